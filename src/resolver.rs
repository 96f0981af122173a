//! Category query → provider module ids.
//!
//! Walks the category tree in document order: main categories, then their
//! matching sub categories, then the configured module buckets, keeping every
//! module that serves the requested region. The result is not de-duplicated;
//! a module listed twice in the tree is requested twice.
//!
//! Two incompatible rule sets exist for the provider's configuration files,
//! so both name matching and bucket selection are configurable:
//!
//! | Setting | Values |
//! |---------|--------|
//! | [`MatchMode`] | `exact` (optionally after prefixing a namespace such as `MM-Name.`), `contains` |
//! | [`BucketPolicy`] | `default_and_other`, `other_only` |

use serde::Deserialize;

use crate::models::{CategoryTree, Module, ModuleId};

/// How a query string is compared with a node name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    #[default]
    Exact,
    Contains,
}

/// Which module lists of a sub category are searched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketPolicy {
    #[default]
    DefaultAndOther,
    OtherOnly,
}

/// Resolver settings, read from the `[resolver]` config table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResolverConfig {
    #[serde(default, rename = "match")]
    pub match_mode: MatchMode,
    /// Prefix prepended to both query parts before matching.
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub buckets: BucketPolicy,
}

/// A (main, sub, region) lookup against a [`CategoryTree`].
#[derive(Debug, Clone)]
pub struct CategoryQuery<'a> {
    pub main: &'a str,
    pub sub: &'a str,
    pub region: &'a str,
}

pub struct CategoryResolver {
    config: ResolverConfig,
}

impl CategoryResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    /// Resolve a query to module ids in tree order.
    ///
    /// An empty result is a valid answer (nothing matched), not an error.
    pub fn resolve(&self, tree: &CategoryTree, query: &CategoryQuery<'_>) -> Vec<ModuleId> {
        let main_target = self.qualify(query.main);
        let sub_target = self.qualify(query.sub);

        let mut found = Vec::new();
        for main in tree.main.iter().filter(|m| self.matches(&m.name, &main_target)) {
            for sub in main.sub.iter().filter(|s| self.matches(&s.name, &sub_target)) {
                found.extend(
                    self.buckets(&sub.module.default, &sub.module.other)
                        .filter(|module| module.serves(query.region))
                        .map(|module| module.id.clone()),
                );
            }
        }
        found
    }

    fn qualify(&self, part: &str) -> String {
        match &self.config.namespace {
            Some(ns) => format!("{}{}", ns, part),
            None => part.to_string(),
        }
    }

    fn matches(&self, node_name: &str, target: &str) -> bool {
        match self.config.match_mode {
            MatchMode::Exact => node_name == target,
            MatchMode::Contains => node_name.contains(target),
        }
    }

    fn buckets<'t>(
        &self,
        default: &'t [Module],
        other: &'t [Module],
    ) -> impl Iterator<Item = &'t Module> {
        let default: &'t [Module] = match self.config.buckets {
            BucketPolicy::DefaultAndOther => default,
            BucketPolicy::OtherOnly => &[],
        };
        default.iter().chain(other.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree(value: serde_json::Value) -> CategoryTree {
        serde_json::from_value(value).unwrap()
    }

    fn generation_tree() -> CategoryTree {
        tree(json!({"main": [{
            "name": "Stromerzeugung",
            "sub": [{
                "name": "Realisierte Erzeugung",
                "module": {
                    "default": [],
                    "other": [
                        {"id": 1, "region": ["DE-LU"]},
                        {"id": 2, "region": ["AT"]}
                    ]
                }
            }]
        }]}))
    }

    fn query<'a>(main: &'a str, sub: &'a str, region: &'a str) -> CategoryQuery<'a> {
        CategoryQuery { main, sub, region }
    }

    #[test]
    fn test_resolves_region_filtered_ids() {
        let resolver = CategoryResolver::new(ResolverConfig::default());
        let ids = resolver.resolve(
            &generation_tree(),
            &query("Stromerzeugung", "Realisierte Erzeugung", "DE-LU"),
        );
        assert_eq!(ids, vec![ModuleId::Number(1)]);
    }

    #[test]
    fn test_no_matching_main_category_is_empty() {
        let resolver = CategoryResolver::new(ResolverConfig::default());
        let ids = resolver.resolve(
            &generation_tree(),
            &query("Stromverbrauch", "Realisierte Erzeugung", "DE-LU"),
        );
        assert!(ids.is_empty());
        assert!(resolver
            .resolve(&CategoryTree::default(), &query("a", "b", "DE"))
            .is_empty());
    }

    #[test]
    fn test_bucket_order_and_policy() {
        let t = tree(json!({"main": [{
            "name": "M",
            "sub": [{
                "name": "S",
                "module": {
                    "default": [{"id": 10, "region": ["DE"]}, {"id": 11, "region": ["DE"]}],
                    "other": [{"id": 20, "region": ["DE", "AT"]}, {"id": 10, "region": ["DE"]}]
                }
            }]
        }]}));

        let both = CategoryResolver::new(ResolverConfig::default());
        let ids: Vec<String> = both
            .resolve(&t, &query("M", "S", "DE"))
            .iter()
            .map(ToString::to_string)
            .collect();
        // duplicates survive
        assert_eq!(ids, vec!["10", "11", "20", "10"]);

        let other_only = CategoryResolver::new(ResolverConfig {
            buckets: BucketPolicy::OtherOnly,
            ..Default::default()
        });
        let ids: Vec<String> = other_only
            .resolve(&t, &query("M", "S", "DE"))
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(ids, vec!["20", "10"]);
    }

    #[test]
    fn test_namespace_exact_vs_contains() {
        let t = tree(json!({"main": [{
            "name": "MM-Name.Stromerzeugung",
            "sub": [
                {"name": "MM-Name.Realisierte Erzeugung", "module": {"other": [{"id": 1, "region": ["DE"]}]}},
                {"name": "MM-Name.Realisierte Erzeugung (alt)", "module": {"other": [{"id": 2, "region": ["DE"]}]}}
            ]
        }]}));

        let exact = CategoryResolver::new(ResolverConfig {
            namespace: Some("MM-Name.".into()),
            ..Default::default()
        });
        assert_eq!(
            exact.resolve(&t, &query("Stromerzeugung", "Realisierte Erzeugung", "DE")),
            vec![ModuleId::Number(1)]
        );

        // Without the namespace nothing is equal.
        let bare = CategoryResolver::new(ResolverConfig::default());
        assert!(bare
            .resolve(&t, &query("Stromerzeugung", "Realisierte Erzeugung", "DE"))
            .is_empty());

        let contains = CategoryResolver::new(ResolverConfig {
            match_mode: MatchMode::Contains,
            ..Default::default()
        });
        assert_eq!(
            contains.resolve(&t, &query("Stromerzeugung", "Realisierte Erzeugung", "DE")),
            vec![ModuleId::Number(1), ModuleId::Number(2)]
        );
    }

    #[test]
    fn test_resolver_config_from_toml() {
        let cfg: ResolverConfig = toml::from_str(
            r#"
            match = "contains"
            namespace = "MM-Name."
            buckets = "other_only"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.match_mode, MatchMode::Contains);
        assert_eq!(cfg.namespace.as_deref(), Some("MM-Name."));
        assert_eq!(cfg.buckets, BucketPolicy::OtherOnly);
    }
}
