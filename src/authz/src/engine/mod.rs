//! Row filter engine
//!
//! Ties the expression compiler, policy index, constraint synthesizer and
//! effect combiner together behind [`RowFilterEngine::render_filter`].
//!
//! ```text
//! PolicySource → PolicyIndex (compiled, expanded, validated)
//!                     ↓
//! activeRoles → EffectCombiner → Synthesizer → (fragment, params)
//!                     ↓                              ↓
//!              [CEL predicates]                  [Metrics]
//! ```

pub mod combiner;
pub mod metrics;

pub use combiner::{CombinationMode, CombineRequest, EffectCombiner, FilterOutcome, RenderedFilter};
pub use metrics::{EngineMetrics, FilterKind, MetricsCollector};

use crate::cel::{Engine as CelEngine, EvalContext};
use crate::context::SecurityContext;
use crate::error::Result;
use crate::expression::{ExpressionCompiler, RuleFrontEnd};
use crate::policy::index::SystemRoles;
use crate::policy::{PolicyDocument, PolicyIndex, PolicySource};
use crate::synth::{MetadataProvider, QueryTarget, Synthesizer};
use crate::types::{EntityType, RoleId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::env;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Row filter engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Master switch; a disabled engine never filters
    pub enabled: bool,

    /// Entity types queried without any filter
    pub exempt_types: Vec<EntityType>,

    /// How constraint resources are combined
    pub combination: CombinationMode,

    /// Enable metrics collection
    pub enable_metrics: bool,

    /// Identifiers of the implicit roles
    pub system_roles: SystemRoles,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            exempt_types: vec!["Account".to_string()],
            combination: CombinationMode::default(),
            enable_metrics: true,
            system_roles: SystemRoles::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `ROWGUARD_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Defaults overridden by the variables `lookup` returns
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(enabled) = lookup("ROWGUARD_ENABLED") {
            config.enabled = parse_flag("ROWGUARD_ENABLED", &enabled, config.enabled);
        }
        if let Some(types) = lookup("ROWGUARD_EXEMPT_TYPES") {
            config.exempt_types = types
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(mode) = lookup("ROWGUARD_COMBINATION") {
            config.combination = mode.parse()?;
        }
        if let Some(metrics) = lookup("ROWGUARD_METRICS") {
            config.enable_metrics = parse_flag("ROWGUARD_METRICS", &metrics, config.enable_metrics);
        }

        Ok(config)
    }
}

fn parse_flag(key: &str, value: &str, default: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        other => {
            warn!("Ignoring {}={}, expected a boolean", key, other);
            default
        }
    }
}

/// Renders row filters for entity queries
pub struct RowFilterEngine {
    /// Rule compiler with its cache
    compiler: Arc<ExpressionCompiler>,

    /// Condition to SQL lowering
    synthesizer: Synthesizer,

    /// Compiled and validated policy
    index: PolicyIndex,

    /// Privilege predicate evaluator with program caching
    cel: Arc<CelEngine>,

    /// Metrics collector (Prometheus)
    metrics: Option<Arc<MetricsCollector>>,

    config: EngineConfig,
}

impl RowFilterEngine {
    /// Build an engine over an already loaded policy document
    ///
    /// Every rule is compiled and every reference validated here; any
    /// configuration error fails construction.
    pub fn new(
        config: EngineConfig,
        document: &PolicyDocument,
        front_end: Arc<dyn RuleFrontEnd>,
        metadata: Arc<dyn MetadataProvider>,
    ) -> Result<Self> {
        let compiler = Arc::new(ExpressionCompiler::new(front_end));
        let cel = Arc::new(CelEngine::new());
        let index = PolicyIndex::build(document, &compiler, &cel, &config.system_roles)?;

        let metrics = if config.enable_metrics {
            Some(Arc::new(MetricsCollector::new()))
        } else {
            None
        };

        info!(
            "RowFilterEngine initialized with enabled={}, combination={:?}, metrics={}, exempt={:?}",
            config.enabled, config.combination, config.enable_metrics, config.exempt_types
        );

        Ok(Self {
            compiler,
            synthesizer: Synthesizer::new(metadata),
            index,
            cel,
            metrics,
            config,
        })
    }

    /// Load the policy from `source` and build a ready engine
    pub async fn bootstrap(
        config: EngineConfig,
        source: &dyn PolicySource,
        front_end: Arc<dyn RuleFrontEnd>,
        metadata: Arc<dyn MetadataProvider>,
    ) -> Result<Self> {
        let document = source.load().await?;
        debug!(
            "Bootstrapping from {} resources and {} roles",
            document.resources.len(),
            document.roles.len()
        );
        Self::new(config, &document, front_end, metadata)
    }

    /// Filter fragment for a query on `entity_type` aliased as `alias`
    ///
    /// `None` means the query runs unrestricted. A refused query gets the
    /// always-false fragment `(1 = 0)`.
    pub fn render_filter(
        &self,
        entity_type: &str,
        alias: &str,
        active_roles: &BTreeSet<RoleId>,
        context: &SecurityContext,
    ) -> Result<Option<RenderedFilter>> {
        Ok(self.evaluate(entity_type, alias, active_roles, context)?.into_filter())
    }

    /// Combine the effects of `active_roles` for one query
    pub fn evaluate(
        &self,
        entity_type: &str,
        alias: &str,
        active_roles: &BTreeSet<RoleId>,
        context: &SecurityContext,
    ) -> Result<FilterOutcome> {
        let start = Instant::now();

        debug!(
            "Filter request: entity_type={}, alias={}, roles={:?}",
            entity_type, alias, active_roles
        );

        let eval = context
            .principal()
            .map(|principal| EvalContext::for_principal(&principal))
            .unwrap_or_default();
        let request = CombineRequest {
            target: QueryTarget::new(entity_type, alias),
            roles: active_roles,
            operands: context,
            eval,
        };

        let combiner = EffectCombiner::new(&self.index, &self.synthesizer, &self.cel);
        let outcome = combiner.combine(&request, self.config.combination);

        if let Some(metrics) = &self.metrics {
            match &outcome {
                Ok(FilterOutcome::Unrestricted) => metrics.record_filter(FilterKind::Unrestricted),
                Ok(FilterOutcome::Refused) => metrics.record_filter(FilterKind::Refused),
                Ok(FilterOutcome::Restricted(_)) => metrics.record_filter(FilterKind::Restricted),
                Err(_) => metrics.record_error(),
            }
            metrics.record_latency(start.elapsed());
        }

        match &outcome {
            Ok(FilterOutcome::Restricted(filter)) => debug!("Filter for {}: {}", entity_type, filter.sql),
            Ok(other) => debug!("Filter for {}: {:?}", entity_type, other),
            Err(err) => warn!("Filter rendering for {} failed: {}", entity_type, err),
        }

        outcome
    }

    /// Whether queries on `entity_type` bypass filtering
    pub fn is_exempt_type(&self, entity_type: &str) -> bool {
        self.config.exempt_types.iter().any(|exempt| exempt == entity_type)
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Whether the policy defines any entity resource at all
    pub fn has_entity_resources(&self) -> bool {
        self.index.has_entity_resources()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn index(&self) -> &PolicyIndex {
        &self.index
    }

    pub fn compiler(&self) -> &ExpressionCompiler {
        &self.compiler
    }

    pub fn synthesizer(&self) -> &Synthesizer {
        &self.synthesizer
    }

    /// Get engine metrics
    pub fn get_metrics(&self) -> Option<EngineMetrics> {
        self.metrics.as_ref().map(|metrics| metrics.get_metrics())
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self) -> Option<String> {
        self.metrics.as_ref().map(|metrics| metrics.export_prometheus())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::GlobalObjects;
    use crate::expression::{Combinator, OperandSource, Operator, StaticFrontEnd};
    use crate::policy::{ResourceDefinition, RoleDefinition};
    use crate::synth::{EntityMapping, StaticMetadata};
    use crate::types::{Effect, Principal};
    use serde_json::json;
    use std::collections::HashMap;

    const OWN: &str = "isType(\"Document\") && property(\"owner\").equals(context.user.id)";

    fn engine(config: EngineConfig) -> RowFilterEngine {
        let front_end = StaticFrontEnd::new().with_rule(
            OWN,
            vec![
                Combinator::is_type("Document"),
                Combinator::property("owner"),
                Combinator::compare(Operator::Eq, OperandSource::global("user", "id")),
                Combinator::and(2),
            ],
        );
        let metadata = StaticMetadata::new()
            .with_entity("Document", EntityMapping::new("documents").with_field("owner", "owner_id"));
        let document = PolicyDocument::new()
            .with_resource("Acme:Own", ResourceDefinition::matching(OWN))
            .with_role("Acme:Editor", RoleDefinition::new().with("Acme:Own", Effect::Grant));
        RowFilterEngine::new(config, &document, Arc::new(front_end), Arc::new(metadata)).unwrap()
    }

    #[test]
    fn test_render_filter_binds_principal() {
        let engine = engine(EngineConfig::default());
        let context = SecurityContext::new(Principal::new("alice"), GlobalObjects::standard());
        let roles = context.active_roles(engine.index()).unwrap().clone();

        let filter = engine.render_filter("Document", "d", &roles, &context).unwrap().unwrap();
        assert_eq!(filter.sql, "NOT (d.owner_id = :p0)");
        assert_eq!(filter.params, vec![("p0".to_string(), json!("alice"))]);

        let editor = SecurityContext::new(Principal::new("bob").with_role("Acme:Editor"), GlobalObjects::standard());
        let roles = editor.active_roles(engine.index()).unwrap().clone();
        assert!(engine.render_filter("Document", "d", &roles, &editor).unwrap().is_none());

        let metrics = engine.get_metrics().unwrap();
        assert_eq!(metrics.total_filters, 2);
        assert_eq!(metrics.restricted, 1);
        assert_eq!(metrics.unrestricted, 1);
    }

    #[test]
    fn test_resolution_failure_is_recorded() {
        let engine = engine(EngineConfig::default());
        let context = SecurityContext::new(Principal::new("alice"), GlobalObjects::new());
        let roles = context.active_roles(engine.index()).unwrap().clone();

        assert!(engine.render_filter("Document", "d", &roles, &context).is_err());
        assert_eq!(engine.get_metrics().unwrap().error_count, 1);
    }

    #[test]
    fn test_metrics_disabled() {
        let engine = engine(EngineConfig {
            enable_metrics: false,
            ..Default::default()
        });
        assert!(engine.get_metrics().is_none());
        assert!(engine.export_prometheus().is_none());
    }

    #[test]
    fn test_exempt_types() {
        let engine = engine(EngineConfig::default());
        assert!(engine.is_exempt_type("Account"));
        assert!(!engine.is_exempt_type("Document"));
    }

    #[test]
    fn test_config_from_vars() {
        let vars: HashMap<&str, &str> = [
            ("ROWGUARD_ENABLED", "false"),
            ("ROWGUARD_EXEMPT_TYPES", "Account, AuditLog,,"),
            ("ROWGUARD_COMBINATION", "resourceBuckets"),
            ("ROWGUARD_METRICS", "maybe"),
        ]
        .into_iter()
        .collect();
        let config = EngineConfig::from_vars(|key| vars.get(key).map(|value| value.to_string())).unwrap();

        assert!(!config.enabled);
        assert_eq!(config.exempt_types, vec!["Account", "AuditLog"]);
        assert_eq!(config.combination, CombinationMode::ResourceBuckets);
        // unparsable flags keep the default
        assert!(config.enable_metrics);

        assert!(EngineConfig::from_vars(|key| (key == "ROWGUARD_COMBINATION").then(|| "strict".to_string())).is_err());
        assert_eq!(EngineConfig::from_vars(|_| None).unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_config_from_json() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"exemptTypes": ["Account", "Tag"], "combination": "resourceBuckets",
                "systemRoles": {"everybody": "Site:Everybody"}}"#,
        )
        .unwrap();
        assert!(config.enabled);
        assert_eq!(config.exempt_types, vec!["Account", "Tag"]);
        assert_eq!(config.combination, CombinationMode::ResourceBuckets);
        assert_eq!(config.system_roles.everybody, "Site:Everybody");
        assert_eq!(config.system_roles.anonymous, SystemRoles::default().anonymous);
    }
}
