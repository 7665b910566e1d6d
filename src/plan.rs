//! Step definitions, the built-in execution plan, plan files and step
//! selection.
//!
//! This module provides:
//! - `Step`, one named SQL block with its 1-based ordinal
//! - `Plan`, a validated ordered list of steps
//! - `PlanFile` loading from TOML or JSON
//! - `Selection`, which resolves `--start-step` / `--only-step` / `--steps`
//! - The built-in plan that builds the tourism analytics views

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::errors::PlanError;

/// Represents a single step of the execution plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    /// 1-based position in the plan
    pub ordinal: u32,
    /// Human-readable description, e.g. "Build region_summary"
    pub name: String,
    /// One or more `;`-terminated statements
    pub sql_body: String,
}

impl Step {
    pub fn new(ordinal: u32, name: &str, sql_body: &str) -> Self {
        Self {
            ordinal,
            name: name.to_string(),
            sql_body: sql_body.to_string(),
        }
    }

    /// Whether the step's description marks it as destructive.
    pub fn is_drop(&self) -> bool {
        self.name.to_ascii_uppercase().contains("DROP")
    }
}

/// A validated plan: ordinals are exactly `1..=N` and names are unique.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    steps: Vec<Step>,
}

impl Plan {
    pub fn new(steps: Vec<Step>) -> Result<Self, PlanError> {
        if steps.is_empty() {
            return Err(PlanError::Empty);
        }
        let mut seen = HashSet::new();
        for (idx, step) in steps.iter().enumerate() {
            if step.ordinal as usize != idx + 1 {
                return Err(PlanError::OrdinalGap {
                    position: idx + 1,
                    found: step.ordinal,
                });
            }
            if !seen.insert(step.name.to_lowercase()) {
                return Err(PlanError::DuplicateName(step.name.clone()));
            }
        }
        Ok(Self { steps })
    }

    /// The plan compiled into the binary.
    pub fn builtin() -> Self {
        Self {
            steps: builtin_steps(),
        }
    }

    /// Load from `path`, or fall back to the built-in plan when `None`.
    pub fn load_or_builtin(path: Option<&Path>) -> Result<Self, PlanError> {
        match path {
            Some(p) => PlanFile::load(p)?.into_plan(),
            None => Ok(Self::builtin()),
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Get a step by 1-based ordinal.
    pub fn get(&self, ordinal: u32) -> Option<&Step> {
        ordinal
            .checked_sub(1)
            .and_then(|idx| self.steps.get(idx as usize))
    }
}

/// On-disk plan format. Ordinals are optional and default to the position.
///
/// ```toml
/// [[steps]]
/// name = "Build region_summary"
/// sql = """
/// CREATE MATERIALIZED VIEW region_summary AS SELECT ...;
/// """
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanFile {
    pub steps: Vec<PlanFileStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanFileStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordinal: Option<u32>,
    pub name: String,
    pub sql: String,
}

impl PlanFile {
    /// Load a plan file; `.json` files are parsed as JSON, anything else as
    /// TOML.
    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let content = std::fs::read_to_string(path).map_err(|source| PlanError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let parsed = if is_json {
            serde_json::from_str(&content).map_err(|e| e.to_string())
        } else {
            toml::from_str(&content).map_err(|e| e.to_string())
        };

        parsed.map_err(|message| PlanError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn into_plan(self) -> Result<Plan, PlanError> {
        let steps = self
            .steps
            .into_iter()
            .enumerate()
            .map(|(idx, s)| Step {
                ordinal: s.ordinal.unwrap_or(idx as u32 + 1),
                name: s.name,
                sql_body: s.sql,
            })
            .collect();
        Plan::new(steps)
    }
}

/// Which steps of the plan to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Every step with ordinal >= start (1-based).
    From(u32),
    /// Exactly one step.
    Only(u32),
    /// Named subset: step names or ordinals, run in plan order.
    Named(Vec<String>),
}

impl Default for Selection {
    fn default() -> Self {
        Selection::From(1)
    }
}

impl Selection {
    /// Build from CLI flags; `only` wins over `names`, which wins over `start`.
    pub fn from_flags(start: u32, only: Option<u32>, names: Option<Vec<String>>) -> Self {
        match (only, names) {
            (Some(n), _) => Selection::Only(n),
            (None, Some(names)) if !names.is_empty() => Selection::Named(names),
            _ => Selection::From(start),
        }
    }

    /// Resolve against `plan`. Invalid ordinals and unknown names are errors.
    pub fn resolve<'a>(&self, plan: &'a Plan) -> Result<Vec<&'a Step>, PlanError> {
        let total = plan.len();
        let out_of_range = |requested: u32| PlanError::StepOutOfRange { requested, total };

        match self {
            Selection::From(start) => {
                if *start == 0 || *start as usize > total {
                    return Err(out_of_range(*start));
                }
                Ok(plan.steps().iter().filter(|s| s.ordinal >= *start).collect())
            }
            Selection::Only(n) => plan.get(*n).map(|s| vec![s]).ok_or_else(|| out_of_range(*n)),
            Selection::Named(names) => {
                let mut wanted = HashSet::new();
                for raw in names {
                    let key = raw.trim();
                    let step = match key.parse::<u32>() {
                        Ok(n) => plan.get(n).ok_or_else(|| out_of_range(n))?,
                        Err(_) => plan
                            .steps()
                            .iter()
                            .find(|s| s.name.eq_ignore_ascii_case(key))
                            .ok_or_else(|| PlanError::UnknownStep(key.to_string()))?,
                    };
                    wanted.insert(step.ordinal);
                }
                Ok(plan
                    .steps()
                    .iter()
                    .filter(|s| wanted.contains(&s.ordinal))
                    .collect())
            }
        }
    }
}

fn builtin_steps() -> Vec<Step> {
    let bodies: [(&str, &str); 9] = [
        ("Prepare transaction indexes", PREPARE_INDEXES),
        ("Build region_summary", REGION_SUMMARY),
        ("Build region_hotspots", REGION_HOTSPOTS),
        ("Build industry_insights", INDUSTRY_INSIGHTS),
        ("Build spatial_patterns", SPATIAL_PATTERNS),
        ("Build temporal_insights", TEMPORAL_INSIGHTS),
        ("Build combined_spatial_analysis", COMBINED_SPATIAL_ANALYSIS),
        ("Build choropleth_analytics", CHOROPLETH_ANALYTICS),
        ("Analyze materialized views", ANALYZE_VIEWS),
    ];
    bodies
        .iter()
        .enumerate()
        .map(|(idx, (name, sql))| Step::new(idx as u32 + 1, name, sql))
        .collect()
}

const PREPARE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_transactions_region_id ON transactions (region_id);
CREATE INDEX IF NOT EXISTS idx_transactions_txn_date ON transactions (txn_date);
CREATE INDEX IF NOT EXISTS idx_transactions_industry ON transactions (industry);
CREATE INDEX IF NOT EXISTS idx_transactions_geom ON transactions USING GIST (geom);
ANALYZE transactions;
"#;

const REGION_SUMMARY: &str = r#"
CREATE MATERIALIZED VIEW region_summary AS
SELECT
    r.id AS region_id,
    r.name AS region_name,
    COUNT(t.*) AS transaction_count,
    COALESCE(SUM(t.amount), 0) AS total_amount,
    COALESCE(AVG(t.amount), 0) AS avg_amount,
    COUNT(DISTINCT t.industry) AS industry_count,
    MIN(t.txn_date) AS first_txn_date,
    MAX(t.txn_date) AS last_txn_date
FROM regions r
LEFT JOIN transactions t ON t.region_id = r.id
GROUP BY r.id, r.name;
CREATE UNIQUE INDEX IF NOT EXISTS idx_region_summary_region_id ON region_summary (region_id);
"#;

const REGION_HOTSPOTS: &str = r#"
CREATE MATERIALIZED VIEW region_hotspots AS
WITH cells AS (
    SELECT
        t.region_id,
        ST_SnapToGrid(t.geom, 0.01) AS cell,
        COUNT(*) AS transaction_count,
        SUM(t.amount) AS total_amount
    FROM transactions t
    WHERE t.geom IS NOT NULL
    GROUP BY t.region_id, ST_SnapToGrid(t.geom, 0.01)
)
SELECT
    region_id,
    cell AS geom,
    transaction_count,
    total_amount,
    PERCENT_RANK() OVER (PARTITION BY region_id ORDER BY total_amount) AS intensity_rank
FROM cells
WHERE transaction_count >= 10;
CREATE INDEX IF NOT EXISTS idx_region_hotspots_geom ON region_hotspots USING GIST (geom);
CREATE INDEX IF NOT EXISTS idx_region_hotspots_region_id ON region_hotspots (region_id);
"#;

const INDUSTRY_INSIGHTS: &str = r#"
CREATE MATERIALIZED VIEW industry_insights AS
SELECT
    t.region_id,
    COALESCE(NULLIF(t.industry, ''), 'Unknown') AS industry,
    COUNT(*) AS transaction_count,
    SUM(t.amount) AS total_amount,
    AVG(t.amount) AS avg_amount,
    SUM(t.amount) / NULLIF(SUM(SUM(t.amount)) OVER (PARTITION BY t.region_id), 0) AS region_share
FROM transactions t
GROUP BY t.region_id, COALESCE(NULLIF(t.industry, ''), 'Unknown');
CREATE INDEX IF NOT EXISTS idx_industry_insights_region_industry ON industry_insights (region_id, industry);
"#;

const SPATIAL_PATTERNS: &str = r#"
CREATE MATERIALIZED VIEW spatial_patterns AS
SELECT
    t.region_id,
    ST_Centroid(ST_Collect(t.geom)) AS centroid,
    ST_ConvexHull(ST_Collect(t.geom)) AS footprint,
    COUNT(*) AS point_count,
    SUM(t.amount) AS total_amount
FROM transactions t
WHERE t.geom IS NOT NULL
GROUP BY t.region_id;
CREATE UNIQUE INDEX IF NOT EXISTS idx_spatial_patterns_region_id ON spatial_patterns (region_id);
CREATE INDEX IF NOT EXISTS idx_spatial_patterns_footprint ON spatial_patterns USING GIST (footprint);
"#;

const TEMPORAL_INSIGHTS: &str = r#"
CREATE MATERIALIZED VIEW temporal_insights AS
SELECT
    t.region_id,
    date_trunc('month', t.txn_date)::date AS month,
    EXTRACT(DOW FROM t.txn_date)::int AS day_of_week,
    COUNT(*) AS transaction_count,
    SUM(t.amount) AS total_amount
FROM transactions t
GROUP BY t.region_id, date_trunc('month', t.txn_date), EXTRACT(DOW FROM t.txn_date);
CREATE INDEX IF NOT EXISTS idx_temporal_insights_region_month ON temporal_insights (region_id, month);
"#;

const COMBINED_SPATIAL_ANALYSIS: &str = r#"
CREATE MATERIALIZED VIEW combined_spatial_analysis AS
SELECT
    rs.region_id,
    rs.region_name,
    rs.transaction_count,
    rs.total_amount,
    sp.centroid,
    sp.footprint,
    COALESCE(h.hotspot_count, 0) AS hotspot_count
FROM region_summary rs
LEFT JOIN spatial_patterns sp ON sp.region_id = rs.region_id
LEFT JOIN (
    SELECT region_id, COUNT(*) AS hotspot_count
    FROM region_hotspots
    GROUP BY region_id
) h ON h.region_id = rs.region_id;
CREATE UNIQUE INDEX IF NOT EXISTS idx_combined_spatial_analysis_region_id ON combined_spatial_analysis (region_id);
"#;

const CHOROPLETH_ANALYTICS: &str = r#"
CREATE MATERIALIZED VIEW choropleth_analytics AS
SELECT
    r.id AS region_id,
    r.name AS region_name,
    r.geom,
    rs.total_amount,
    rs.transaction_count,
    NTILE(5) OVER (ORDER BY rs.total_amount) AS amount_quintile,
    rs.total_amount / NULLIF(ST_Area(r.geom::geography) / 1000000.0, 0) AS amount_per_km2
FROM regions r
JOIN region_summary rs ON rs.region_id = r.id;
CREATE INDEX IF NOT EXISTS idx_choropleth_analytics_geom ON choropleth_analytics USING GIST (geom);
"#;

const ANALYZE_VIEWS: &str = r#"
ANALYZE region_summary;
ANALYZE region_hotspots;
ANALYZE industry_insights;
ANALYZE spatial_patterns;
ANALYZE temporal_insights;
ANALYZE combined_spatial_analysis;
ANALYZE choropleth_analytics;
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::{extract_view_name, split_statements};
    use std::fs;
    use tempfile::tempdir;

    fn small_plan() -> Plan {
        Plan::new(vec![
            Step::new(1, "One", "SELECT 1;"),
            Step::new(2, "Two", "SELECT 2;"),
            Step::new(3, "Three", "SELECT 3;"),
        ])
        .unwrap()
    }

    fn ordinals(steps: &[&Step]) -> Vec<u32> {
        steps.iter().map(|s| s.ordinal).collect()
    }

    // =========================================
    // Plan validation tests
    // =========================================

    #[test]
    fn test_plan_rejects_empty() {
        assert!(matches!(Plan::new(vec![]), Err(PlanError::Empty)));
    }

    #[test]
    fn test_plan_rejects_ordinal_gap() {
        let result = Plan::new(vec![Step::new(1, "a", "x"), Step::new(3, "b", "y")]);
        assert!(matches!(
            result,
            Err(PlanError::OrdinalGap {
                position: 2,
                found: 3
            })
        ));
    }

    #[test]
    fn test_plan_rejects_duplicate_names() {
        let result = Plan::new(vec![Step::new(1, "Build", "x"), Step::new(2, "build", "y")]);
        assert!(matches!(result, Err(PlanError::DuplicateName(_))));
    }

    #[test]
    fn test_plan_get_by_ordinal() {
        let plan = small_plan();
        assert_eq!(plan.get(2).unwrap().name, "Two");
        assert!(plan.get(0).is_none());
        assert!(plan.get(4).is_none());
    }

    // =========================================
    // Selection tests
    // =========================================

    #[test]
    fn test_selection_from_start() {
        let plan = small_plan();
        let steps = Selection::From(2).resolve(&plan).unwrap();
        assert_eq!(ordinals(&steps), vec![2, 3]);
    }

    #[test]
    fn test_selection_default_runs_everything() {
        let plan = small_plan();
        let steps = Selection::default().resolve(&plan).unwrap();
        assert_eq!(ordinals(&steps), vec![1, 2, 3]);
    }

    #[test]
    fn test_selection_start_out_of_range() {
        let plan = small_plan();
        assert!(matches!(
            Selection::From(0).resolve(&plan),
            Err(PlanError::StepOutOfRange { requested: 0, total: 3 })
        ));
        assert!(Selection::From(4).resolve(&plan).is_err());
    }

    #[test]
    fn test_selection_only() {
        let plan = small_plan();
        let steps = Selection::Only(3).resolve(&plan).unwrap();
        assert_eq!(ordinals(&steps), vec![3]);
        assert!(Selection::Only(9).resolve(&plan).is_err());
    }

    #[test]
    fn test_selection_named_in_plan_order() {
        let plan = small_plan();
        let sel = Selection::Named(vec!["three".into(), "1".into(), "Three".into()]);
        let steps = sel.resolve(&plan).unwrap();
        assert_eq!(ordinals(&steps), vec![1, 3]);
    }

    #[test]
    fn test_selection_named_unknown() {
        let plan = small_plan();
        let sel = Selection::Named(vec!["Four".into()]);
        assert!(matches!(sel.resolve(&plan), Err(PlanError::UnknownStep(_))));
    }

    #[test]
    fn test_selection_from_flags_precedence() {
        assert_eq!(Selection::from_flags(2, Some(5), None), Selection::Only(5));
        assert_eq!(
            Selection::from_flags(2, Some(5), Some(vec!["a".into()])),
            Selection::Only(5)
        );
        assert_eq!(
            Selection::from_flags(2, None, Some(vec!["a".into()])),
            Selection::Named(vec!["a".into()])
        );
        assert_eq!(Selection::from_flags(2, None, Some(vec![])), Selection::From(2));
        assert_eq!(Selection::from_flags(2, None, None), Selection::From(2));
    }

    // =========================================
    // Plan file tests
    // =========================================

    #[test]
    fn test_plan_file_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.toml");
        fs::write(
            &path,
            r#"
[[steps]]
name = "Create t"
sql = "CREATE TABLE t (a int);"

[[steps]]
name = "Fill t"
sql = """
INSERT INTO t VALUES (1);
INSERT INTO t VALUES (2);
"""
"#,
        )
        .unwrap();

        let plan = Plan::load_or_builtin(Some(&path)).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.steps()[1].ordinal, 2);
        assert_eq!(split_statements(&plan.steps()[1].sql_body).len(), 2);
    }

    #[test]
    fn test_plan_file_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.json");
        fs::write(
            &path,
            r#"{"steps": [{"ordinal": 1, "name": "Only", "sql": "SELECT 1;"}]}"#,
        )
        .unwrap();

        let plan = Plan::load_or_builtin(Some(&path)).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.steps()[0].name, "Only");
    }

    #[test]
    fn test_plan_file_bad_ordinal_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.json");
        fs::write(
            &path,
            r#"{"steps": [{"ordinal": 2, "name": "Only", "sql": "SELECT 1;"}]}"#,
        )
        .unwrap();

        assert!(matches!(
            Plan::load_or_builtin(Some(&path)),
            Err(PlanError::OrdinalGap { .. })
        ));
    }

    #[test]
    fn test_plan_file_missing() {
        let result = PlanFile::load(Path::new("/nonexistent/plan.toml"));
        assert!(matches!(result, Err(PlanError::Read { .. })));
    }

    #[test]
    fn test_plan_file_invalid_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.toml");
        fs::write(&path, "[[steps]\nname = ").unwrap();
        let err = PlanFile::load(&path).unwrap_err();
        assert!(err.to_string().contains("failed to parse plan file"));
    }

    // =========================================
    // Built-in plan tests
    // =========================================

    #[test]
    fn test_builtin_plan_is_valid() {
        let plan = Plan::builtin();
        assert!(Plan::new(plan.steps().to_vec()).is_ok());
        assert_eq!(plan.len(), 9);
    }

    #[test]
    fn test_builtin_plan_builds_every_analytic_view() {
        let plan = Plan::builtin();
        let created: Vec<String> = plan
            .steps()
            .iter()
            .flat_map(|s| split_statements(&s.sql_body))
            .filter_map(|stmt| extract_view_name(&stmt))
            .map(|v| v.name)
            .collect();

        for view in [
            "region_summary",
            "region_hotspots",
            "industry_insights",
            "spatial_patterns",
            "temporal_insights",
            "combined_spatial_analysis",
            "choropleth_analytics",
        ] {
            assert!(created.iter().any(|c| c == view), "missing {view}");
        }
    }

    #[test]
    fn test_step_is_drop() {
        assert!(Step::new(1, "Drop stale views", "").is_drop());
        assert!(!Step::new(1, "Build region_summary", "").is_drop());
    }
}
