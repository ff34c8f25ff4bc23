use std::collections::HashSet;

use threadline_common::{Item, ItemId};

/// Merge candidate lists from every source into one processing order.
///
/// The first occurrence of an id wins (earlier sources take precedence), and
/// the result is sorted ascending by numeric id so the watermark can advance
/// after each item.
pub fn merge_candidates<I>(sources: I) -> Vec<Item>
where
    I: IntoIterator<Item = Vec<Item>>,
{
    let mut seen: HashSet<ItemId> = HashSet::new();
    let mut merged: Vec<Item> = sources
        .into_iter()
        .flatten()
        .filter(|item| seen.insert(item.id.clone()))
        .collect();
    merged.sort_by(|a, b| a.id.cmp(&b.id));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::item;

    fn ids(items: &[Item]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn overlapping_sources_merge_to_the_union_sorted() {
        let mentions = vec![item("105", None), item("99", None), item("101", None)];
        let tracked = vec![item("101", None), item("1000", None), item("99", None)];

        let merged = merge_candidates([mentions, tracked]);
        assert_eq!(ids(&merged), vec!["99", "101", "105", "1000"]);
    }

    #[test]
    fn first_occurrence_wins() {
        let mut from_mentions = item("7", None);
        from_mentions.text = "from mentions".into();
        let mut from_author = item("7", None);
        from_author.text = "from author search".into();

        let merged = merge_candidates([vec![from_mentions], vec![from_author]]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].text, "from mentions");
    }

    #[test]
    fn empty_sources_merge_to_nothing() {
        assert!(merge_candidates(Vec::<Vec<Item>>::new()).is_empty());
        assert!(merge_candidates([Vec::new(), Vec::new()]).is_empty());
    }

    #[test]
    fn ids_beyond_u64_sort_numerically() {
        let merged = merge_candidates([vec![
            item("100000000000000000000", None),
            item("18446744073709551615", None),
        ]]);
        assert_eq!(
            ids(&merged),
            vec!["18446744073709551615", "100000000000000000000"]
        );
    }
}
