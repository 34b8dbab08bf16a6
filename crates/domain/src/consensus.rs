//! 投票统计

use std::collections::BTreeMap;

use crate::message::{Content, DISCONNECT};

/// 按票面值统计票数，忽略旁观者标记和空票
pub fn aggregate_votes<'a, I>(votes: I) -> BTreeMap<String, usize>
where
    I: IntoIterator<Item = Option<&'a Content>>,
{
    let mut counts = BTreeMap::new();
    for vote in votes.into_iter().flatten() {
        if vote.is_text(DISCONNECT) {
            continue;
        }
        *counts.entry(vote.to_string()).or_insert(0) += 1;
    }
    counts
}

/// 至少有一票，且所有票面值相同
pub fn has_consensus(counts: &BTreeMap<String, usize>) -> bool {
    counts.len() == 1 && counts.values().all(|count| *count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregation_skips_spectators_and_absent_votes() {
        let three = Content::number(3);
        let five = Content::number(5);
        let spectator = Content::text(DISCONNECT);
        let counts = aggregate_votes(vec![
            Some(&three),
            Some(&three),
            Some(&five),
            Some(&spectator),
            None,
        ]);

        assert_eq!(counts.get("3"), Some(&2));
        assert_eq!(counts.get("5"), Some(&1));
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn consensus_requires_single_value() {
        let three = Content::number(3);
        let five = Content::number(5);
        assert!(has_consensus(&aggregate_votes(vec![Some(&three), Some(&three)])));
        assert!(!has_consensus(&aggregate_votes(vec![Some(&three), Some(&five)])));
        assert!(!has_consensus(&aggregate_votes(Vec::new())));
    }
}
