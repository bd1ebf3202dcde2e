use std::collections::{BTreeSet, HashSet};

use rand::Rng;
use rand::seq::SliceRandom;

use jobrunner_core::{LoopConfig, Priority, QueueId, ReadyMap};

/// Include-set entry matching every type present in the ready map.
const WILDCARD: &str = "*";

/// Choose one ready (type, tenant) queue for a loop, or `None` when
/// nothing the loop may serve is ready.
///
/// At high priority the loop's low-priority types are excluded; at low
/// priority they are served alongside the regular includes. Every
/// (type, tenant) entry weighs the same in the final sample, so tenants
/// with few types are not starved, and the randomness spreads load
/// across peer runners without coordination.
pub fn select_queue(
    config: &LoopConfig,
    priority: Priority,
    ready: &ReadyMap,
    rng: &mut impl Rng,
) -> Option<QueueId> {
    let mut include: Vec<&str> = config.include.iter().map(String::as_str).collect();
    let mut exclude: HashSet<&str> = config.exclude.iter().map(String::as_str).collect();

    match priority {
        Priority::High => exclude.extend(config.low_priority.iter().map(String::as_str)),
        Priority::Low => include.extend(config.low_priority.iter().map(String::as_str)),
    }

    if include.contains(&WILDCARD) {
        include.extend(ready.types());
    }

    let candidates: BTreeSet<&str> = include
        .into_iter()
        .filter(|ty| *ty != WILDCARD && !exclude.contains(ty))
        .collect();

    let entries: Vec<QueueId> = candidates
        .into_iter()
        .filter_map(|ty| ready.tenants_for(ty).map(|tenants| (ty, tenants)))
        .flat_map(|(ty, tenants)| tenants.keys().map(move |tenant| QueueId::new(ty, tenant)))
        .collect();

    entries.choose(rng).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn loop_config(include: &[&str], exclude: &[&str], low_priority: &[&str]) -> LoopConfig {
        LoopConfig {
            runners: 1,
            include: include.iter().map(|s| (*s).to_owned()).collect(),
            exclude: exclude.iter().map(|s| (*s).to_owned()).collect(),
            low_priority: low_priority.iter().map(|s| (*s).to_owned()).collect(),
        }
    }

    fn ready(entries: &[(&str, &str)]) -> ReadyMap {
        entries
            .iter()
            .map(|(ty, tenant)| (QueueId::new(*ty, *tenant), 100))
            .collect()
    }

    #[test]
    fn wildcard_expands_to_ready_types_minus_filters() {
        // include={*}, exclude={z}, low-priority={y}, priority=high:
        // only type "a" survives, so its lone tenant is chosen.
        let config = loop_config(&["*"], &["z"], &["y"]);
        let map = ready(&[("a", "t1"), ("y", "t1"), ("z", "t1")]);
        let mut rng = StdRng::seed_from_u64(0);

        let picked = select_queue(&config, Priority::High, &map, &mut rng).unwrap();
        assert_eq!(picked, QueueId::new("a", "t1"));
    }

    #[test]
    fn low_priority_types_served_only_at_low() {
        let config = loop_config(&[], &[], &["bulk"]);
        let map = ready(&[("bulk", "t1")]);
        let mut rng = StdRng::seed_from_u64(0);

        assert!(select_queue(&config, Priority::High, &map, &mut rng).is_none());
        assert_eq!(
            select_queue(&config, Priority::Low, &map, &mut rng),
            Some(QueueId::new("bulk", "t1"))
        );
    }

    #[test]
    fn exclude_beats_include() {
        let config = loop_config(&["a", "b"], &["b"], &[]);
        let map = ready(&[("a", "t1"), ("b", "t1")]);
        let mut rng = StdRng::seed_from_u64(0);

        for _ in 0..20 {
            let picked = select_queue(&config, Priority::High, &map, &mut rng).unwrap();
            assert_eq!(picked.queue_type, "a");
        }
    }

    #[test]
    fn empty_candidates_return_none() {
        let config = loop_config(&["a"], &[], &[]);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(select_queue(&config, Priority::High, &ReadyMap::new(), &mut rng).is_none());
    }

    #[test]
    fn identical_inputs_and_seed_are_idempotent() {
        let config = loop_config(&["*"], &[], &[]);
        let map = ready(&[
            ("a", "t1"),
            ("a", "t2"),
            ("b", "t1"),
            ("b", "t3"),
            ("c", "t2"),
        ]);

        let picks: Vec<_> = (0..10)
            .map(|_| {
                let mut rng = StdRng::seed_from_u64(42);
                select_queue(&config, Priority::High, &map, &mut rng).unwrap()
            })
            .collect();

        assert!(picks.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn every_tenant_entry_is_reachable() {
        // Uniform sampling over (type, tenant) entries: with enough
        // draws each entry shows up.
        let config = loop_config(&["*"], &[], &[]);
        let map = ready(&[("a", "t1"), ("a", "t2"), ("b", "t1")]);
        let mut rng = StdRng::seed_from_u64(7);

        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            seen.insert(select_queue(&config, Priority::High, &map, &mut rng).unwrap());
        }
        assert_eq!(seen.len(), 3);
    }
}
