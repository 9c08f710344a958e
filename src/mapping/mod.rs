//! Resource-mapping merge.
//!
//! Combines the inline mapping configuration of an import request with a
//! reusable [`ResourceMapping`](crate::resources::ResourceMapping) by source
//! identity. The inline (primary) side always wins identity collisions.

use crate::resources::{MappingConfiguration, MappingItem};
use std::collections::{HashMap, HashSet};

/// Merge two mapping lists by source identity.
///
/// # Algorithm
/// 1. An absent side yields the other side unchanged.
/// 2. Primary items with neither id nor name are dropped.
/// 3. Every other primary item is kept and evicts secondary items sharing its
///    id or name from both indices.
/// 4. Remaining secondary items indexed by id are appended, then remaining
///    items indexed only by name whose id was not consumed.
///
/// Leftover secondary items keep their original relative order.
pub fn merge_mappings(
    primary: Option<&[MappingItem]>,
    secondary: Option<&[MappingItem]>,
) -> Option<Vec<MappingItem>> {
    let (primary, secondary) = match (primary, secondary) {
        (None, secondary) => return secondary.map(<[MappingItem]>::to_vec),
        (primary, None) => return primary.map(<[MappingItem]>::to_vec),
        (Some(primary), Some(secondary)) => (primary, secondary),
    };

    let mut by_id: HashMap<&str, usize> = HashMap::new();
    let mut by_name: HashMap<&str, usize> = HashMap::new();
    for (index, item) in secondary.iter().enumerate() {
        if let Some(id) = item.source.id.as_deref() {
            by_id.insert(id, index);
        }
        if let Some(name) = item.source.name.as_deref() {
            by_name.insert(name, index);
        }
    }

    let mut consumed_ids: HashSet<&str> = HashSet::new();
    let mut merged = Vec::with_capacity(primary.len() + secondary.len());

    for item in primary {
        if !item.is_identifiable() {
            tracing::debug!(
                mapping_target = %item.target.name,
                "Dropping mapping item without source id or name"
            );
            continue;
        }
        merged.push(item.clone());

        if let Some(id) = item.source.id.as_deref() {
            consumed_ids.insert(id);
            if let Some(index) = by_id.remove(id) {
                evict_name(&mut by_name, &secondary[index], index);
            }
        }
        if let Some(name) = item.source.name.as_deref() {
            if let Some(index) = by_name.remove(name) {
                evict_id(&mut by_id, &mut consumed_ids, &secondary[index], index);
            }
        }
    }

    let mut remaining_by_id: Vec<usize> = by_id.values().copied().collect();
    remaining_by_id.sort_unstable();
    for index in remaining_by_id {
        let item = &secondary[index];
        evict_name(&mut by_name, item, index);
        if let Some(id) = item.source.id.as_deref() {
            consumed_ids.insert(id);
        }
        merged.push(item.clone());
    }

    let mut remaining_by_name: Vec<usize> = by_name.values().copied().collect();
    remaining_by_name.sort_unstable();
    for index in remaining_by_name {
        let item = &secondary[index];
        let id_consumed = item
            .source
            .id
            .as_deref()
            .is_some_and(|id| consumed_ids.contains(id));
        if !id_consumed {
            merged.push(item.clone());
        }
    }

    Some(merged)
}

fn evict_name(by_name: &mut HashMap<&str, usize>, item: &MappingItem, index: usize) {
    if let Some(name) = item.source.name.as_deref() {
        if by_name.get(name) == Some(&index) {
            by_name.remove(name);
        }
    }
}

fn evict_id<'a>(
    by_id: &mut HashMap<&'a str, usize>,
    consumed_ids: &mut HashSet<&'a str>,
    item: &'a MappingItem,
    index: usize,
) {
    if let Some(id) = item.source.id.as_deref() {
        consumed_ids.insert(id);
        if by_id.get(id) == Some(&index) {
            by_id.remove(id);
        }
    }
}

/// Merge the inline configuration of a request with an external mapping resource.
///
/// Network and storage mappings are merged with the inline side as primary.
/// Disk mappings are specific to one VM and are taken from the inline side only.
pub fn merge_configuration(
    inline: Option<&MappingConfiguration>,
    external: Option<&MappingConfiguration>,
) -> MappingConfiguration {
    MappingConfiguration {
        network_mappings: merge_mappings(
            inline.and_then(|m| m.network_mappings.as_deref()),
            external.and_then(|m| m.network_mappings.as_deref()),
        ),
        storage_mappings: merge_mappings(
            inline.and_then(|m| m.storage_mappings.as_deref()),
            external.and_then(|m| m.storage_mappings.as_deref()),
        ),
        disk_mappings: inline.and_then(|m| m.disk_mappings.clone()),
    }
}

/// Find the mapping for a source object by id, falling back to name.
///
/// Unidentifiable items never match.
pub fn find_mapping<'a>(
    mappings: Option<&'a [MappingItem]>,
    id: Option<&str>,
    name: Option<&str>,
) -> Option<&'a MappingItem> {
    let mappings = mappings?;
    let by_id = id.and_then(|id| {
        mappings
            .iter()
            .find(|m| m.source.id.as_deref() == Some(id))
    });
    by_id.or_else(|| {
        name.and_then(|name| {
            mappings
                .iter()
                .find(|m| m.source.name.as_deref() == Some(name))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::MappingSource;

    fn item(source: MappingSource, target: &str) -> MappingItem {
        MappingItem::new(source, target)
    }

    fn targets(items: &[MappingItem]) -> Vec<&str> {
        items.iter().map(|m| m.target.name.as_str()).collect()
    }

    #[test]
    fn test_absent_side_returns_other_unchanged() {
        let list = vec![
            item(MappingSource::id("a"), "t-a"),
            // Unidentifiable items survive when there is nothing to merge
            item(MappingSource::default(), "t-none"),
        ];

        assert_eq!(merge_mappings(Some(list.as_slice()), None), Some(list.clone()));
        assert_eq!(merge_mappings(None, Some(list.as_slice())), Some(list));
        assert_eq!(merge_mappings(None, None), None);
    }

    #[test]
    fn test_empty_is_not_absent() {
        let secondary = vec![item(MappingSource::id("a"), "t-a")];
        let merged = merge_mappings(Some(&[][..]), Some(secondary.as_slice())).unwrap();
        assert_eq!(targets(&merged), vec!["t-a"]);
    }

    #[test]
    fn test_primary_wins_id_collision() {
        let primary = vec![item(MappingSource::id("net-1"), "inline")];
        let secondary = vec![item(MappingSource::id("net-1"), "external")];

        let merged = merge_mappings(Some(primary.as_slice()), Some(secondary.as_slice())).unwrap();
        assert_eq!(targets(&merged), vec!["inline"]);
    }

    #[test]
    fn test_primary_wins_name_collision() {
        let primary = vec![item(MappingSource::name("ovirtmgmt"), "inline")];
        let secondary = vec![item(MappingSource::both("net-1", "ovirtmgmt"), "external")];

        let merged = merge_mappings(Some(primary.as_slice()), Some(secondary.as_slice())).unwrap();
        assert_eq!(targets(&merged), vec!["inline"]);
    }

    #[test]
    fn test_primary_id_evicts_secondary_name_entry() {
        let primary = vec![item(MappingSource::id("net-1"), "inline")];
        let secondary = vec![item(MappingSource::both("net-1", "ovirtmgmt"), "external")];

        let merged = merge_mappings(Some(primary.as_slice()), Some(secondary.as_slice())).unwrap();
        assert_eq!(targets(&merged), vec!["inline"]);
    }

    #[test]
    fn test_unidentifiable_primary_dropped() {
        let primary = vec![
            item(MappingSource::default(), "nameless"),
            item(MappingSource::id("a"), "t-a"),
        ];
        let secondary = vec![item(MappingSource::id("b"), "t-b")];

        let merged = merge_mappings(Some(primary.as_slice()), Some(secondary.as_slice())).unwrap();
        assert_eq!(targets(&merged), vec!["t-a", "t-b"]);
    }

    #[test]
    fn test_disjoint_entries_survive_in_order() {
        let primary = vec![item(MappingSource::id("a"), "t-a")];
        let secondary = vec![
            item(MappingSource::name("only-name"), "t-name"),
            item(MappingSource::id("c"), "t-c"),
            item(MappingSource::both("d", "dee"), "t-d"),
        ];

        let merged = merge_mappings(Some(primary.as_slice()), Some(secondary.as_slice())).unwrap();
        // By-id leftovers first, then name-only leftovers
        assert_eq!(targets(&merged), vec!["t-a", "t-c", "t-d", "t-name"]);
    }

    #[test]
    fn test_leftover_with_both_keys_emitted_once() {
        let secondary = vec![item(MappingSource::both("x", "ex"), "t-x")];
        let merged = merge_mappings(Some(&[][..]), Some(secondary.as_slice())).unwrap();
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn test_merge_configuration_keeps_inline_disk_mappings() {
        let inline = MappingConfiguration {
            network_mappings: None,
            storage_mappings: Some(vec![item(MappingSource::name("data"), "fast")]),
            disk_mappings: Some(vec![item(MappingSource::id("disk-1"), "slow")]),
        };
        let external = MappingConfiguration {
            network_mappings: Some(vec![item(MappingSource::name("ovirtmgmt"), "pod")]),
            storage_mappings: Some(vec![
                item(MappingSource::name("data"), "standard"),
                item(MappingSource::name("iso"), "standard"),
            ]),
            disk_mappings: Some(vec![item(MappingSource::id("disk-2"), "ignored")]),
        };

        let merged = merge_configuration(Some(&inline), Some(&external));
        assert_eq!(targets(merged.network_mappings.as_ref().unwrap()), vec!["pod"]);
        assert_eq!(
            targets(merged.storage_mappings.as_ref().unwrap()),
            vec!["fast", "standard"]
        );
        assert_eq!(targets(merged.disk_mappings.as_ref().unwrap()), vec!["slow"]);
    }

    #[test]
    fn test_find_mapping_prefers_id() {
        let mappings = vec![
            item(MappingSource::name("data"), "by-name"),
            item(MappingSource::id("sd-1"), "by-id"),
            item(MappingSource::default(), "nameless"),
        ];

        let found = find_mapping(Some(mappings.as_slice()), Some("sd-1"), Some("data")).unwrap();
        assert_eq!(found.target.name, "by-id");

        let found = find_mapping(Some(mappings.as_slice()), Some("sd-2"), Some("data")).unwrap();
        assert_eq!(found.target.name, "by-name");

        assert!(find_mapping(Some(mappings.as_slice()), None, None).is_none());
        assert!(find_mapping(None, Some("sd-1"), None).is_none());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::resources::MappingSource;
    use proptest::prelude::*;

    /// Secondary items with unique ids and names; each has at least one of them.
    fn secondary_items() -> impl Strategy<Value = Vec<MappingItem>> {
        proptest::collection::vec((any::<bool>(), any::<bool>()), 0..8).prop_map(|flags| {
            flags
                .into_iter()
                .enumerate()
                .map(|(i, (has_id, has_name))| {
                    let source = MappingSource {
                        id: (has_id || !has_name).then(|| format!("id-{}", i)),
                        name: has_name.then(|| format!("name-{}", i)),
                    };
                    MappingItem::new(source, format!("secondary-{}", i))
                })
                .collect()
        })
    }

    /// Primary items drawing ids and names from the same pool, sometimes neither.
    fn primary_items() -> impl Strategy<Value = Vec<MappingItem>> {
        proptest::collection::vec(
            (
                proptest::option::of(0usize..10),
                proptest::option::of(0usize..10),
            ),
            0..6,
        )
        .prop_map(|picks| {
            picks
                .into_iter()
                .enumerate()
                .map(|(i, (id, name))| {
                    let source = MappingSource {
                        id: id.map(|n| format!("id-{}", n)),
                        name: name.map(|n| format!("name-{}", n)),
                    };
                    MappingItem::new(source, format!("primary-{}", i))
                })
                .collect()
        })
    }

    fn collides(a: &MappingSource, b: &MappingSource) -> bool {
        (a.id.is_some() && a.id == b.id) || (a.name.is_some() && a.name == b.name)
    }

    proptest! {
        #[test]
        fn prop_absent_side_returns_other(items in secondary_items()) {
            prop_assert_eq!(merge_mappings(None, Some(items.as_slice())), Some(items.clone()));
            prop_assert_eq!(merge_mappings(Some(items.as_slice()), None), Some(items.clone()));
            prop_assert_eq!(merge_mappings(None, None), None);
        }

        #[test]
        fn prop_primary_wins_collisions(
            primary in primary_items(),
            secondary in secondary_items(),
        ) {
            let merged =
                merge_mappings(Some(primary.as_slice()), Some(secondary.as_slice())).unwrap();

            let kept: Vec<&MappingItem> =
                primary.iter().filter(|m| m.is_identifiable()).collect();
            let survivors: Vec<&MappingItem> = secondary
                .iter()
                .filter(|s| !kept.iter().any(|p| collides(&p.source, &s.source)))
                .collect();
            // Survivors indexed by id come before name-only ones
            let expected: Vec<&MappingItem> = kept
                .iter()
                .copied()
                .chain(survivors.iter().copied().filter(|s| s.source.id.is_some()))
                .chain(survivors.iter().copied().filter(|s| s.source.id.is_none()))
                .collect();

            prop_assert_eq!(merged.iter().collect::<Vec<_>>(), expected);
        }

        #[test]
        fn prop_merged_sources_resolve_to_primary(
            primary in primary_items(),
            secondary in secondary_items(),
        ) {
            let merged =
                merge_mappings(Some(primary.as_slice()), Some(secondary.as_slice())).unwrap();
            for item in primary.iter().filter(|m| m.is_identifiable()) {
                let found = find_mapping(
                    Some(merged.as_slice()),
                    item.source.id.as_deref(),
                    item.source.name.as_deref(),
                )
                .unwrap();
                prop_assert!(found.target.name.starts_with("primary-"));
            }
        }
    }
}
