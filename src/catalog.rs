use serde_json::Value;
use std::collections::HashMap;

/// Where a catalog entry's query text comes from. Exactly one source per
/// entry, enforced structurally.
#[derive(Debug, Clone, PartialEq)]
pub enum QuerySource {
    /// Literal SQL embedded in the catalog.
    Inline(String),
    /// Path into the external versioned SQL source, fetched at run time.
    Remote(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    Jsonl,
}

/// How each cursor row maps to a JSON line. Only meaningful for JSONL output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JsonRowSource {
    #[default]
    AllColumns,
    /// The single selected column already holds a serialized JSON document;
    /// re-emit it verbatim.
    FirstColumn,
}

/// Post-processing applied to JSON object keys before emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyCasing {
    #[default]
    AsIs,
    Camel,
}

/// One exportable query. `name` doubles as the artifact base name and the
/// manifest key.
#[derive(Debug, Clone)]
pub struct QueryDef {
    pub name: String,
    pub source: QuerySource,
    pub description: Option<String>,
    /// Bind parameters passed through to the warehouse unmodified.
    pub parameters: HashMap<String, Value>,
    /// Marks the artifact as a candidate for the shared bundle.
    pub in_bundle: bool,
    pub format: OutputFormat,
    pub json_source: JsonRowSource,
    pub key_casing: KeyCasing,
}

impl QueryDef {
    pub fn new(name: &str, source: QuerySource) -> Self {
        Self {
            name: name.to_string(),
            source,
            description: None,
            parameters: HashMap::new(),
            in_bundle: false,
            format: OutputFormat::Csv,
            json_source: JsonRowSource::default(),
            key_casing: KeyCasing::default(),
        }
    }

    /// Shorthand for an entry exported straight from a table of the same name.
    pub fn from_table(name: &str) -> Self {
        Self::new(name, QuerySource::Inline(format!("select * from {name}")))
    }

    pub fn description(mut self, desc: &str) -> Self {
        self.description = Some(desc.to_string());
        self
    }

    pub fn parameters(mut self, params: HashMap<String, Value>) -> Self {
        self.parameters = params;
        self
    }

    pub fn in_bundle(mut self) -> Self {
        self.in_bundle = true;
        self
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn json_source(mut self, json_source: JsonRowSource) -> Self {
        self.json_source = json_source;
        self
    }

    pub fn key_casing(mut self, key_casing: KeyCasing) -> Self {
        self.key_casing = key_casing;
        self
    }

    /// Logical artifact name, extension determined by the output format.
    pub fn file_name(&self) -> String {
        match self.format {
            OutputFormat::Csv => format!("{}.csv.gz", self.name),
            OutputFormat::Jsonl => format!("{}.jsonl.gz", self.name),
        }
    }
}

/// The fixed set of query definitions available to a run.
#[derive(Debug, Clone)]
pub struct Catalog {
    queries: Vec<QueryDef>,
}

impl Catalog {
    pub fn new(queries: Vec<QueryDef>) -> Self {
        Self { queries }
    }

    /// The curated exports this deployment publishes.
    pub fn builtin() -> Self {
        let mut date_range = HashMap::new();
        date_range.insert("from".to_string(), Value::from("2019-11-01"));
        date_range.insert(
            "to".to_string(),
            Value::from(chrono::Utc::now().format("%Y-%m-01").to_string()),
        );

        Self::new(vec![
            QueryDef::new(
                "vis_channel_stats",
                QuerySource::Remote("sql/vis_channel_stats.sql".to_string()),
            )
            .description("per-channel statistics combined from classification and API data")
            .parameters(date_range.clone())
            .in_bundle(),
            QueryDef::new(
                "vis_category_recs",
                QuerySource::Remote("sql/vis_category_recs.sql".to_string()),
            )
            .description("aggregate recommendations between all category combinations")
            .parameters(date_range.clone())
            .in_bundle(),
            QueryDef::new(
                "vis_channel_recs",
                QuerySource::Remote("sql/vis_channel_recs.sql".to_string()),
            )
            .description("aggregated recommendations between channels")
            .parameters(date_range)
            .in_bundle(),
            QueryDef::new(
                "channel_review",
                QuerySource::Remote("sql/channel_review.sql".to_string()),
            )
            .description("per-reviewer classifications and the calculated majority view")
            .in_bundle(),
            QueryDef::new(
                "accepted_channels",
                QuerySource::Inline(
                    "select channel_id, channel_title, tags, logo_url, channel_views, subs \
                     from channel_accepted order by channel_views desc"
                        .to_string(),
                ),
            )
            .format(OutputFormat::Jsonl)
            .key_casing(KeyCasing::Camel),
            QueryDef::from_table("class_channels").format(OutputFormat::Jsonl),
        ])
    }

    pub fn queries(&self) -> &[QueryDef] {
        &self.queries
    }

    /// Entries matching the requested names (case-insensitive), or the whole
    /// catalog when no selection is given.
    pub fn select(&self, names: Option<&[String]>) -> Vec<QueryDef> {
        match names {
            None => self.queries.clone(),
            Some(names) => self
                .queries
                .iter()
                .filter(|q| names.iter().any(|n| n.eq_ignore_ascii_case(&q.name)))
                .cloned()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_follows_output_format() {
        let csv = QueryDef::from_table("stats");
        assert_eq!(csv.file_name(), "stats.csv.gz");

        let jsonl = QueryDef::from_table("stats").format(OutputFormat::Jsonl);
        assert_eq!(jsonl.file_name(), "stats.jsonl.gz");
    }

    #[test]
    fn from_table_defaults_to_select_star() {
        let q = QueryDef::from_table("channel_latest");
        assert_eq!(
            q.source,
            QuerySource::Inline("select * from channel_latest".to_string())
        );
    }

    #[test]
    fn select_matches_names_case_insensitively() {
        let catalog = Catalog::new(vec![
            QueryDef::from_table("alpha"),
            QueryDef::from_table("beta"),
        ]);
        let picked = catalog.select(Some(&["ALPHA".to_string()]));
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].name, "alpha");
    }

    #[test]
    fn select_without_names_returns_everything() {
        let catalog = Catalog::builtin();
        assert_eq!(catalog.select(None).len(), catalog.queries().len());
    }

    #[test]
    fn builtin_names_are_unique() {
        let catalog = Catalog::builtin();
        let mut names: Vec<_> = catalog.queries().iter().map(|q| &q.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), catalog.queries().len());
    }
}
