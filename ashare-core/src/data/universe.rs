//! Index membership: which symbols belonged to an index during a window.

use super::provider::{DataError, DateRange, MarketDataClient};
use std::collections::BTreeSet;
use tracing::debug;

/// Every constituent that appeared in `index_code` at any point in `range`.
///
/// A symbol that joined or left mid-window is included. The result is
/// de-duplicated and sorted ascending; an index with no membership records
/// yields an empty list.
pub fn resolve_members(
    client: &dyn MarketDataClient,
    index_code: &str,
    range: &DateRange,
) -> Result<Vec<String>, DataError> {
    let weights = client.index_weight(index_code, range)?;
    let snapshots = weights
        .iter()
        .map(|w| w.trade_date)
        .collect::<BTreeSet<_>>()
        .len();

    let members: BTreeSet<&str> = weights.iter().map(|w| w.con_code.as_str()).collect();
    debug!(
        index_code,
        snapshots,
        members = members.len(),
        "resolved index membership"
    );
    Ok(members.into_iter().map(String::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fake::FakeClient;
    use crate::data::provider::parse_wire_date;

    #[test]
    fn union_across_rebalances() {
        let mut fake = FakeClient::new();
        let jan = parse_wire_date("20240131").unwrap();
        let feb = parse_wire_date("20240229").unwrap();
        fake.add_index_weight("IDX", "AAA", jan, 0.5);
        fake.add_index_weight("IDX", "BBB", jan, 0.5);
        fake.add_index_weight("IDX", "BBB", feb, 0.5);
        fake.add_index_weight("IDX", "CCC", feb, 0.5);
        let range = DateRange::parse("20240101", "20240331").unwrap();

        let members = resolve_members(&fake, "IDX", &range).unwrap();

        assert_eq!(members, vec!["AAA", "BBB", "CCC"]);
        assert_eq!(fake.calls(), vec!["index_weight:IDX"]);
    }

    #[test]
    fn other_indices_and_dates_are_ignored() {
        let mut fake = FakeClient::new();
        fake.add_index_weight("IDX", "ZZZ", parse_wire_date("20240131").unwrap(), 1.0);
        fake.add_index_weight("IDX", "OLD", parse_wire_date("20231229").unwrap(), 1.0);
        fake.add_index_weight("OTHER", "YYY", parse_wire_date("20240131").unwrap(), 1.0);
        let range = DateRange::parse("20240101", "20240331").unwrap();

        assert_eq!(resolve_members(&fake, "IDX", &range).unwrap(), vec!["ZZZ"]);
    }

    #[test]
    fn empty_membership_is_empty_list() {
        let fake = FakeClient::new();
        let range = DateRange::parse("20240101", "20240331").unwrap();
        assert!(resolve_members(&fake, "IDX", &range).unwrap().is_empty());
    }
}
