use serde::{Deserialize, Serialize};

use super::PlanNodeInfo;
use crate::explain::explainable::{ExplainConfig, ExplainEntry, Explainable};
use crate::expr::Expression;
use crate::ids::FragmentId;

/// Receives rows streamed from other fragments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeNode {
    /// Fragment whose sink feeds this exchange.
    pub source_fragment: FragmentId,
    /// Number of instances sending to this exchange, set when exec params
    /// are computed.
    pub num_senders: usize,
}

impl PlanNodeInfo for ExchangeNode {
    fn name(&self) -> &'static str {
        "Exchange"
    }

    fn for_each_expr<'a, F>(&'a self, _func: &mut F)
    where
        F: FnMut(&'a Expression),
    {
    }
}

impl Explainable for ExchangeNode {
    fn explain_entry(&self, conf: ExplainConfig) -> ExplainEntry {
        let ent = ExplainEntry::new("EXCHANGE").with_value("fragment", self.source_fragment);
        if conf.verbose {
            ent.with_value("num_senders", self.num_senders)
        } else {
            ent
        }
    }
}
