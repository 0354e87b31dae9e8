use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use indexmap::IndexMap;

use crate::common::LabelSet;
use crate::formatting::{
    sanitize_label_key, sanitize_metric_name, write_help_line, write_metric_line, write_type_line,
};

/// A single gauge family: one metric name with a fixed label name schema.
///
/// An instrument holds one value per label tuple. Writing a tuple overwrites whatever value
/// that tuple held before, and tuples are never dropped once recorded.
#[derive(Debug)]
pub struct Instrument {
    help: String,
    schema: Vec<String>,
    values: RwLock<BTreeMap<Vec<String>, f64>>,
}

impl Instrument {
    fn new(help: String, schema: Vec<String>) -> Self {
        Self { help, schema, values: RwLock::new(BTreeMap::new()) }
    }

    /// Returns the help text this instrument was first registered with.
    pub fn help(&self) -> &str {
        &self.help
    }

    /// Returns the label name schema this instrument was first registered with.
    pub fn schema(&self) -> &[String] {
        &self.schema
    }

    /// Returns the currently recorded label tuples and their values, ordered by tuple.
    pub fn snapshot(&self) -> BTreeMap<Vec<String>, f64> {
        self.values.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set(&self, tuple: Vec<String>, value: f64) {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.insert(tuple, value);
    }
}

/// A registry of lazily created gauge instruments.
///
/// Instruments are created on first use and live for the lifetime of the registry. The first
/// registration of a name fixes its help text and label name schema; later registrations
/// reuse the existing instrument untouched. Names and label keys are sanitized on the way
/// in, so callers never have to care about the exposition format's character rules.
#[derive(Debug)]
pub struct Registry {
    instruments: RwLock<IndexMap<String, Arc<Instrument>>>,
}

impl Registry {
    /// Creates a new, empty `Registry`.
    pub fn new() -> Self {
        Self { instruments: RwLock::new(IndexMap::new()) }
    }

    /// Gets or creates the instrument registered under `name`.
    ///
    /// The help text and label names only take effect when the call creates the instrument.
    /// Re-registering an existing name with a different set of label names is a bug in the
    /// caller: debug builds panic, release builds keep the original schema.
    pub fn ensure(&self, name: &str, help: &str, label_names: &[String]) -> Arc<Instrument> {
        let name = sanitize_metric_name(name);
        let schema =
            label_names.iter().map(|key| sanitize_label_key(key)).collect::<Vec<String>>();

        let instruments = self.instruments.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(instrument) = instruments.get(&name) {
            assert_schema_unchanged(&name, instrument.schema(), &schema);
            return Arc::clone(instrument);
        }
        drop(instruments);

        let mut instruments = self.instruments.write().unwrap_or_else(PoisonError::into_inner);
        let instrument = instruments
            .entry(name.clone())
            .or_insert_with(|| Arc::new(Instrument::new(help.to_string(), schema.clone())));
        assert_schema_unchanged(&name, instrument.schema(), &schema);
        Arc::clone(instrument)
    }

    /// Sets a gauge to `value` for the given label set, creating the instrument on first use.
    ///
    /// The label names of `labels` double as the instrument's schema. An observation whose
    /// label names do not match the schema the instrument was first registered with is
    /// dropped rather than recorded against the wrong tuple.
    pub fn set_gauge(&self, name: &str, help: &str, labels: &LabelSet, value: f64) {
        let labels = labels.sanitized();
        let schema = labels.names();

        let instrument = self.ensure(name, help, &schema);
        if let Some(tuple) = labels.values_for_schema(instrument.schema()) {
            instrument.set(tuple, value);
        }
    }

    /// Sets one gauge value per entry of a keyed breakdown.
    ///
    /// Each entry of `values_by_key` becomes a label tuple carrying `base_labels` plus
    /// `label_key` set to the entry's key. An empty breakdown still registers the
    /// instrument, just without any values.
    pub fn set_gauge_by_label(
        &self,
        name: &str,
        help: &str,
        base_labels: &LabelSet,
        label_key: &str,
        values_by_key: &HashMap<String, f64>,
    ) {
        let mut schema_labels = base_labels.clone();
        schema_labels.insert(label_key, "");
        let schema = schema_labels.sanitized().names();

        let instrument = self.ensure(name, help, &schema);
        for (key, value) in values_by_key {
            let mut labels = base_labels.clone();
            labels.insert(label_key, key.clone());
            let labels = labels.sanitized();
            if let Some(tuple) = labels.values_for_schema(instrument.schema()) {
                instrument.set(tuple, *value);
            }
        }
    }

    /// Returns the instrument registered under `name`, if any.
    ///
    /// The name is sanitized before the lookup, matching what [`ensure`][Registry::ensure]
    /// does on registration.
    pub fn get(&self, name: &str) -> Option<Arc<Instrument>> {
        let name = sanitize_metric_name(name);
        let instruments = self.instruments.read().unwrap_or_else(PoisonError::into_inner);
        instruments.get(&name).map(Arc::clone)
    }

    /// Returns the number of registered instruments.
    pub fn len(&self) -> usize {
        self.instruments.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if no instruments have been registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Renders all registered instruments in the Prometheus exposition format.
    ///
    /// Families appear in registration order, and the label tuples within a family are
    /// ordered lexically, so repeated scrapes of unchanged values render identically.
    pub fn render(&self) -> String {
        let instruments = {
            let instruments = self.instruments.read().unwrap_or_else(PoisonError::into_inner);
            instruments
                .iter()
                .map(|(name, instrument)| (name.clone(), Arc::clone(instrument)))
                .collect::<Vec<_>>()
        };

        let mut output = String::new();
        for (name, instrument) in instruments {
            write_help_line(&mut output, &name, instrument.help());
            write_type_line(&mut output, &name, "gauge");

            for (tuple, value) in instrument.snapshot() {
                write_metric_line(&mut output, &name, instrument.schema(), &tuple, value);
            }

            output.push('\n');
        }

        output
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn assert_schema_unchanged(name: &str, existing: &[String], requested: &[String]) {
    debug_assert!(
        existing.len() == requested.len() && requested.iter().all(|key| existing.contains(key)),
        "instrument `{}` re-registered with label names {:?}, but was first registered with {:?}",
        name,
        requested,
        existing,
    );
}

/// Handle for rendering the current contents of a [`Registry`].
///
/// Handles are cheap to clone and all clones observe the same registry.
#[derive(Clone)]
pub struct ScrapeHandle {
    registry: Arc<Registry>,
}

impl ScrapeHandle {
    /// Creates a handle over the given registry.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Renders the registry contents in the Prometheus exposition format.
    pub fn render(&self) -> String {
        self.registry.render()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::{Registry, ScrapeHandle};
    use crate::common::LabelSet;

    #[test]
    fn ensure_is_idempotent_and_first_registration_wins() {
        let registry = Registry::new();
        let schema = vec!["zone_id".to_string(), "zone_name".to_string()];

        let first = registry.ensure(
            "cloudflare_requests_rate24h",
            "Total number of requests over the last 24h",
            &schema,
        );
        let second =
            registry.ensure("cloudflare_requests_rate24h", "a different help text", &schema);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.help(), "Total number of requests over the last 24h");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "re-registered with label names")]
    fn ensure_panics_on_schema_mismatch_in_debug_builds() {
        let registry = Registry::new();
        registry.ensure("gauge", "A gauge.", &["a".to_string()]);
        registry.ensure("gauge", "A gauge.", &["b".to_string()]);
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn mismatched_observations_are_dropped_in_release_builds() {
        let registry = Registry::new();
        registry.set_gauge("gauge", "A gauge.", &LabelSet::from_pairs([("a", "1")]), 1.0);
        registry.set_gauge("gauge", "A gauge.", &LabelSet::from_pairs([("b", "2")]), 2.0);

        let instrument = registry.get("gauge").unwrap();
        assert_eq!(instrument.schema(), &["a".to_string()]);
        assert_eq!(instrument.snapshot().len(), 1);
    }

    #[test]
    fn set_gauge_overwrites_previous_value() {
        let registry = Registry::new();
        let labels = LabelSet::from_pairs([("zone_id", "abc123"), ("zone_name", "example.com")]);

        registry.set_gauge("cloudflare_requests_rate24h", "Total requests", &labels, 1000.0);
        registry.set_gauge("cloudflare_requests_rate24h", "Total requests", &labels, 900.0);

        let instrument = registry.get("cloudflare_requests_rate24h").unwrap();
        let values = instrument.snapshot();
        assert_eq!(values.len(), 1);
        let tuple = vec!["abc123".to_string(), "example.com".to_string()];
        assert_eq!(values.get(&tuple), Some(&900.0));
    }

    #[test]
    fn label_order_does_not_split_tuples() {
        let registry = Registry::new();
        let forwards = LabelSet::from_pairs([("zone_id", "abc123"), ("zone_name", "example.com")]);
        let backwards = LabelSet::from_pairs([("zone_name", "example.com"), ("zone_id", "abc123")]);

        registry.set_gauge("gauge", "A gauge.", &forwards, 1.0);
        registry.set_gauge("gauge", "A gauge.", &backwards, 2.0);

        let instrument = registry.get("gauge").unwrap();
        let values = instrument.snapshot();
        assert_eq!(values.len(), 1);
        let tuple = vec!["abc123".to_string(), "example.com".to_string()];
        assert_eq!(values.get(&tuple), Some(&2.0));
    }

    #[test]
    fn breakdowns_fan_out_one_tuple_per_key() {
        let registry = Registry::new();
        let base = LabelSet::from_pairs([("zone_id", "abc123"), ("zone_name", "example.com")]);
        let mut by_country = HashMap::new();
        by_country.insert("US".to_string(), 500.0);
        by_country.insert("DE".to_string(), 200.0);

        registry.set_gauge_by_label(
            "cloudflare_requests_country_rate24h",
            "Total number of requests over the last 24h by request country",
            &base,
            "country",
            &by_country,
        );

        let instrument = registry.get("cloudflare_requests_country_rate24h").unwrap();
        assert_eq!(
            instrument.schema(),
            &["zone_id".to_string(), "zone_name".to_string(), "country".to_string()]
        );

        let values = instrument.snapshot();
        assert_eq!(values.len(), 2);
        let us = vec!["abc123".to_string(), "example.com".to_string(), "US".to_string()];
        let de = vec!["abc123".to_string(), "example.com".to_string(), "DE".to_string()];
        assert_eq!(values.get(&us), Some(&500.0));
        assert_eq!(values.get(&de), Some(&200.0));
    }

    #[test]
    fn empty_breakdown_registers_instrument_without_values() {
        let registry = Registry::new();
        let base = LabelSet::from_pairs([("zone_id", "abc123"), ("zone_name", "example.com")]);
        let by_country: HashMap<String, f64> = HashMap::new();

        registry.set_gauge_by_label(
            "cloudflare_requests_country_rate24h",
            "Total number of requests over the last 24h by request country",
            &base,
            "country",
            &by_country,
        );

        let instrument = registry.get("cloudflare_requests_country_rate24h").unwrap();
        assert_eq!(
            instrument.schema(),
            &["zone_id".to_string(), "zone_name".to_string(), "country".to_string()]
        );
        assert!(instrument.snapshot().is_empty());
    }

    #[test]
    fn rendering_matches_expected_output() {
        let registry = Registry::new();
        let labels = LabelSet::from_pairs([("wutang", "forever")]);
        registry.set_gauge("basic_gauge", "A basic gauge", &labels, -1.23);

        let expected = concat!(
            "# HELP basic_gauge A basic gauge\n",
            "# TYPE basic_gauge gauge\n",
            "basic_gauge{wutang=\"forever\"} -1.23\n",
            "\n",
        );
        assert_eq!(expected, registry.render());
    }

    #[test]
    fn rendering_preserves_registration_order_and_sorts_tuples() {
        let registry = Registry::new();

        let base = LabelSet::from_pairs([("zone_name", "example.com")]);
        let mut by_country = HashMap::new();
        by_country.insert("US".to_string(), 500.0);
        by_country.insert("DE".to_string(), 200.0);
        registry.set_gauge_by_label(
            "zone_requests_country",
            "Requests by country",
            &base,
            "country",
            &by_country,
        );
        registry.set_gauge("active_zones", "Number of active zones", &LabelSet::new(), 2.0);

        let expected = concat!(
            "# HELP zone_requests_country Requests by country\n",
            "# TYPE zone_requests_country gauge\n",
            "zone_requests_country{zone_name=\"example.com\",country=\"DE\"} 200\n",
            "zone_requests_country{zone_name=\"example.com\",country=\"US\"} 500\n",
            "\n",
            "# HELP active_zones Number of active zones\n",
            "# TYPE active_zones gauge\n",
            "active_zones 2\n",
            "\n",
        );
        assert_eq!(expected, registry.render());
    }

    #[test]
    fn rendering_sanitizes_names_keys_and_values() {
        let registry = Registry::new();
        let labels = LabelSet::from_pairs([("content-type", "text/html; charset=\"utf-8\"")]);
        let help = "Requests by content type";
        registry.set_gauge("cloudflare.requests.content_type", help, &labels, 7.0);

        assert!(registry.get("cloudflare.requests.content_type").is_some());
        assert!(registry.get("cloudflare_requests_content_type").is_some());

        let rendered = registry.render();
        assert!(rendered.contains(
            "cloudflare_requests_content_type{content_type=\"text/html; charset=\\\"utf-8\\\"\"} 7\n"
        ));
    }

    #[test]
    fn scrape_handle_observes_registry_updates() {
        let registry = Arc::new(Registry::new());
        let handle = ScrapeHandle::new(registry.clone());
        assert_eq!(handle.render(), "");

        registry.set_gauge("basic_gauge", "A basic gauge", &LabelSet::new(), 3.0);
        assert!(handle.render().contains("basic_gauge 3\n"));
    }
}
