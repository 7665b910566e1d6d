use std::io::{self, Write};
use std::sync::RwLock;

use indicatif::MultiProgress;
use tracing_subscriber::EnvFilter;

/// Progress bars that log lines must not tear.
static PROGRESS: RwLock<Option<MultiProgress>> = RwLock::new(None);

/// Initialize structured logging on stderr.
///
/// `RUST_LOG` wins when set; otherwise `verbose` selects `debug` over `info`
/// for this crate and `warn` for everything else.
pub fn init(verbose: bool, json: bool) {
    let default_level = if verbose {
        "viewforge=debug,warn"
    } else {
        "viewforge=info,warn"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(|| ProgressAwareStderr)
        .with_target(false);

    // A second init (tests, embedding) keeps the first subscriber
    if json {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.try_init();
    }
}

/// Route log lines through `multi` until [`detach_progress`] is called.
pub fn attach_progress(multi: &MultiProgress) {
    if let Ok(mut slot) = PROGRESS.write() {
        *slot = Some(multi.clone());
    }
}

pub fn detach_progress() {
    if let Ok(mut slot) = PROGRESS.write() {
        *slot = None;
    }
}

/// Stderr writer that clears visible progress bars around each write and
/// redraws them afterwards.
struct ProgressAwareStderr;

impl Write for ProgressAwareStderr {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let attached = PROGRESS.read().ok().and_then(|slot| slot.clone());
        match attached {
            Some(multi) if !multi.is_hidden() => multi.suspend(|| io::stderr().write(buf)),
            _ => io::stderr().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indicatif::ProgressDrawTarget;

    #[test]
    fn test_writes_pass_through_attached_progress() {
        let multi = MultiProgress::with_draw_target(ProgressDrawTarget::hidden());
        attach_progress(&multi);

        let written = ProgressAwareStderr.write(b"step succeeded\n").unwrap();
        assert_eq!(written, 15);
        assert!(PROGRESS.read().unwrap().is_some());

        detach_progress();
        assert!(PROGRESS.read().unwrap().is_none());
        assert_eq!(ProgressAwareStderr.write(b"done\n").unwrap(), 5);
    }
}
