use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use strata_error::{DbError, Result};

/// Level of detail of the explain output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExplainLevel {
    #[default]
    Normal,
    Verbose,
}

impl FromStr for ExplainLevel {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "verbose" => Ok(Self::Verbose),
            other => Err(DbError::config(format!("Invalid explain level: '{other}'"))),
        }
    }
}

impl fmt::Display for ExplainLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Verbose => write!(f, "verbose"),
        }
    }
}

/// Configuration for planning a single query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerConfig {
    /// 1 plans for a single node, 0 for every available host, n > 1 for n
    /// nodes.
    pub num_nodes: usize,
    /// Maximum length of a single scan range, 0 for no limit.
    pub max_scan_range_length: u64,
    pub explain_level: ExplainLevel,
    /// Maximum nesting of inline views and unions.
    pub max_plan_depth: usize,
    /// Broadcast the right side of a join when it's known to be no larger
    /// than the left side. When false joins are partitioned unless hinted.
    pub broadcast_by_default: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        PlannerConfig {
            num_nodes: 1,
            max_scan_range_length: 0,
            explain_level: ExplainLevel::Normal,
            max_plan_depth: DEFAULT_MAX_PLAN_DEPTH,
            broadcast_by_default: true,
        }
    }
}

impl PlannerConfig {
    pub fn is_single_node(&self) -> bool {
        self.num_nodes == 1
    }

    /// Number of partitions to split the leftmost scan of a fragment into, 0
    /// for no limit.
    ///
    /// One node is reserved for the coordinator.
    pub fn num_partitions(&self) -> usize {
        match self.num_nodes {
            0 => 0,
            1 => 1,
            n => n - 1,
        }
    }

    pub fn set_from_str(&mut self, name: &str, value: &str) -> Result<()> {
        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| DbError::config(format!("Missing setting for '{name}'")))?;

        (func.set)(value, self)
    }

    pub fn get_as_string(&self, name: &str) -> Result<String> {
        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| DbError::config(format!("Missing setting for '{name}'")))?;

        Ok((func.get)(self))
    }

    pub fn reset(&mut self, name: &str) -> Result<()> {
        let def_conf = Self::default();

        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| DbError::config(format!("Missing setting for '{name}'")))?;

        let value = (func.get)(&def_conf);
        (func.set)(&value, self)
    }

    /// Names of every setting, sorted.
    pub fn setting_names() -> Vec<&'static str> {
        let mut names: Vec<_> = GET_SET_FUNCTIONS.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

struct SettingFunctions {
    set: fn(value: &str, conf: &mut PlannerConfig) -> Result<()>,
    get: fn(conf: &PlannerConfig) -> String,
}

impl SettingFunctions {
    const fn new<S: PlannerSetting>() -> Self {
        SettingFunctions {
            set: S::set_from_str as _,
            get: S::get_as_string as _,
        }
    }
}

fn insert_setting<S: PlannerSetting>(map: &mut HashMap<&'static str, SettingFunctions>) {
    if map.insert(S::NAME, SettingFunctions::new::<S>()).is_some() {
        panic!("Duplicate settings names: {}", S::NAME);
    }
}

static GET_SET_FUNCTIONS: LazyLock<HashMap<&'static str, SettingFunctions>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    insert_setting::<NumNodes>(&mut map);
    insert_setting::<MaxScanRangeLength>(&mut map);
    insert_setting::<ExplainLevelSetting>(&mut map);
    insert_setting::<MaxPlanDepth>(&mut map);
    insert_setting::<BroadcastByDefault>(&mut map);

    map
});

pub trait PlannerSetting: Sync + Send + 'static {
    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    fn set_from_str(value: &str, conf: &mut PlannerConfig) -> Result<()>;
    fn get_as_string(conf: &PlannerConfig) -> String;
}

fn parse_value<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| DbError::config(format!("Invalid value for '{name}': '{value}'")))
}

pub struct NumNodes;

impl PlannerSetting for NumNodes {
    const NAME: &'static str = "num_nodes";
    const DESCRIPTION: &'static str =
        "Number of nodes to plan for. 1 plans for a single node, 0 uses every host";

    fn set_from_str(value: &str, conf: &mut PlannerConfig) -> Result<()> {
        conf.num_nodes = parse_value(Self::NAME, value)?;
        Ok(())
    }

    fn get_as_string(conf: &PlannerConfig) -> String {
        conf.num_nodes.to_string()
    }
}

pub struct MaxScanRangeLength;

impl PlannerSetting for MaxScanRangeLength {
    const NAME: &'static str = "max_scan_range_length";
    const DESCRIPTION: &'static str = "Maximum length in bytes of a single scan range, 0 for no limit";

    fn set_from_str(value: &str, conf: &mut PlannerConfig) -> Result<()> {
        conf.max_scan_range_length = parse_value(Self::NAME, value)?;
        Ok(())
    }

    fn get_as_string(conf: &PlannerConfig) -> String {
        conf.max_scan_range_length.to_string()
    }
}

pub struct ExplainLevelSetting;

impl PlannerSetting for ExplainLevelSetting {
    const NAME: &'static str = "explain_level";
    const DESCRIPTION: &'static str = "Detail of explain output, 'normal' or 'verbose'";

    fn set_from_str(value: &str, conf: &mut PlannerConfig) -> Result<()> {
        conf.explain_level = value.trim().parse()?;
        Ok(())
    }

    fn get_as_string(conf: &PlannerConfig) -> String {
        conf.explain_level.to_string()
    }
}

pub const DEFAULT_MAX_PLAN_DEPTH: usize = 64;

pub struct MaxPlanDepth;

impl PlannerSetting for MaxPlanDepth {
    const NAME: &'static str = "max_plan_depth";
    const DESCRIPTION: &'static str = "Maximum nesting of inline views and unions";

    fn set_from_str(value: &str, conf: &mut PlannerConfig) -> Result<()> {
        let val: usize = parse_value(Self::NAME, value)?;
        if val == 0 {
            return Err(DbError::config("Plan depth cannot be zero"));
        }
        conf.max_plan_depth = val;
        Ok(())
    }

    fn get_as_string(conf: &PlannerConfig) -> String {
        conf.max_plan_depth.to_string()
    }
}

pub struct BroadcastByDefault;

impl PlannerSetting for BroadcastByDefault {
    const NAME: &'static str = "broadcast_by_default";
    const DESCRIPTION: &'static str =
        "Broadcast the smaller right side of unhinted joins instead of partitioning";

    fn set_from_str(value: &str, conf: &mut PlannerConfig) -> Result<()> {
        conf.broadcast_by_default = parse_value(Self::NAME, value)?;
        Ok(())
    }

    fn get_as_string(conf: &PlannerConfig) -> String {
        conf.broadcast_by_default.to_string()
    }
}
