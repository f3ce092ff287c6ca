// ABOUTME: Deterministic dependency ordering for enabled features.
// ABOUTME: Kahn's algorithm with cycle detection and foundation-first output.

use anyhow::{bail, Result};
use std::collections::{BTreeSet, HashMap};

use crate::feature::{FeatureDescriptor, FOUNDATION};

/// Order the enabled features so every feature loads after its dependencies.
///
/// Fails before any graph work when a feature names a dependency that is not
/// enabled (the foundational feature is exempt: it is always present). Ties
/// between ready features break by name, so the order is stable across runs.
/// The foundational feature is moved to position 0 as a final invariant check.
pub fn resolve_load_order(enabled: &[FeatureDescriptor]) -> Result<Vec<FeatureDescriptor>> {
    let index_of: HashMap<&str, usize> = enabled
        .iter()
        .enumerate()
        .map(|(i, d)| (d.name(), i))
        .collect();

    // Report bad declarations precisely, before touching the graph.
    for descriptor in enabled {
        for dep in descriptor.depends_on() {
            if *dep != FOUNDATION && !index_of.contains_key(dep) {
                bail!(
                    "Feature '{}' depends on '{}', which is not enabled",
                    descriptor.name(),
                    dep
                );
            }
        }
    }

    // Edges run dependency -> dependent; only enabled sources count.
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); enabled.len()];
    let mut in_degree: Vec<usize> = vec![0; enabled.len()];
    for (i, descriptor) in enabled.iter().enumerate() {
        for dep in descriptor.depends_on() {
            if let Some(&source) = index_of.get(dep) {
                dependents[source].push(i);
                in_degree[i] += 1;
            }
        }
    }

    // Indices follow discovery (name) order, so the smallest ready index is
    // also the lexically smallest ready feature.
    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order: Vec<usize> = Vec::with_capacity(enabled.len());
    while let Some(&next) = ready.iter().next() {
        ready.remove(&next);
        order.push(next);
        for &dependent in &dependents[next] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() < enabled.len() {
        let mut stuck: Vec<&str> = enabled
            .iter()
            .enumerate()
            .filter(|(i, _)| !order.contains(i))
            .map(|(_, d)| d.name())
            .collect();
        stuck.sort_unstable();
        bail!("Dependency cycle detected among features: {}", stuck.join(", "));
    }

    let mut resolved: Vec<FeatureDescriptor> =
        order.into_iter().map(|i| enabled[i].clone()).collect();

    if let Some(pos) = resolved.iter().position(|d| d.name() == FOUNDATION) {
        if pos != 0 {
            tracing::debug!(from = pos, "Relocating foundational feature to load first");
            let foundation = resolved.remove(pos);
            resolved.insert(0, foundation);
        }
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::testing::StubFeature;
    use crate::feature::discover;

    fn resolve(manifest: Vec<std::sync::Arc<dyn crate::feature::Feature>>) -> Result<Vec<String>> {
        let discovered = discover(manifest)?;
        let resolved = resolve_load_order(&discovered)?;
        Ok(resolved.iter().map(|d| d.name().to_string()).collect())
    }

    #[test]
    fn dependencies_load_before_dependents() {
        let order = resolve(vec![
            StubFeature::new("core", &[]),
            StubFeature::new("music", &["core"]),
            StubFeature::new("music-stats", &["core", "music"]),
        ])
        .unwrap();
        assert_eq!(order, ["core", "music", "music-stats"]);
    }

    #[test]
    fn ties_break_by_name() {
        let order = resolve(vec![
            StubFeature::new("core", &[]),
            StubFeature::new("zeta", &["core"]),
            StubFeature::new("alpha", &["core"]),
            StubFeature::new("mid", &["core"]),
        ])
        .unwrap();
        assert_eq!(order, ["core", "alpha", "mid", "zeta"]);
    }

    #[test]
    fn foundation_moves_to_front() {
        // "aaa" has no dependencies at all, so Kahn emits it before core.
        let order = resolve(vec![
            StubFeature::new("core", &[]),
            StubFeature::new("aaa", &[]),
        ])
        .unwrap();
        assert_eq!(order, ["core", "aaa"]);
    }

    #[test]
    fn missing_dependency_names_both_parties() {
        let err = resolve(vec![
            StubFeature::new("core", &[]),
            StubFeature::new("music-comments", &["music"]),
        ])
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("music-comments"));
        assert!(message.contains("'music'"));
    }

    #[test]
    fn foundation_dependency_is_always_satisfied() {
        // A manifest without an explicit core entry still resolves: the
        // foundational name is exempt from the missing-dependency check.
        let order = resolve(vec![StubFeature::new("solo", &["core"])]).unwrap();
        assert_eq!(order, ["solo"]);
    }

    #[test]
    fn cycles_are_fatal_and_name_participants() {
        let err = resolve(vec![
            StubFeature::new("core", &[]),
            StubFeature::new("a", &["core", "b"]),
            StubFeature::new("b", &["core", "a"]),
        ])
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("cycle"));
        assert!(message.ends_with("a, b"));
    }

    #[test]
    fn self_cycle_is_detected() {
        let err = resolve(vec![
            StubFeature::new("core", &[]),
            StubFeature::new("narcissus", &["narcissus"]),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("narcissus"));
    }

    #[test]
    fn order_is_stable_across_runs() {
        let build = || {
            resolve(vec![
                StubFeature::new("core", &[]),
                StubFeature::new("music", &["core"]),
                StubFeature::new("llm", &["core"]),
                StubFeature::new("music-comments", &["music", "music-stats"]),
                StubFeature::new("music-stats", &["music"]),
            ])
            .unwrap()
        };
        let first = build();
        for _ in 0..10 {
            assert_eq!(build(), first);
        }
    }
}
