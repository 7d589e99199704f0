//! Fluent builder for LQL requests.
//!
//! LQL is a line-oriented, unquoted protocol: a raw CR or LF inside a value
//! would be a header-injection primitive. The builder therefore sanitises
//! every token and value before a line is rendered, and stores filter and
//! header lines pre-rendered so the caller's composition order maps 1:1 to
//! LQL semantics (`And: N` / `Or: N` glue the N most recent expressions).

use std::fmt;

/// Output formats accepted by Livestatus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    Json,
    Python,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
            OutputFormat::Python => "python",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filter operators. Not exhaustive; Livestatus also has list operators,
/// which can be injected through [`LivestatusQuery::filter`] when needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Equal,
    NotEqual,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
    /// Case-sensitive regex match.
    Regex,
    /// Case-insensitive regex match.
    RegexIcase,
}

impl Op {
    pub fn as_str(self) -> &'static str {
        match self {
            Op::Equal => "=",
            Op::NotEqual => "!=",
            Op::LessThan => "<",
            Op::LessOrEqual => "<=",
            Op::GreaterThan => ">",
            Op::GreaterOrEqual => ">=",
            Op::Regex => "~",
            Op::RegexIcase => "~~",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds a single LQL request.
///
/// All methods mutate in place and return `&mut Self` so calls can be
/// chained. The builder is `Clone`; the actor copies it at ingress so a
/// caller mutating the builder after submission does not affect in-flight
/// work.
#[derive(Debug, Clone)]
pub struct LivestatusQuery {
    table: String,
    columns: Vec<String>,
    /// Each entry is a full `Filter: ...` line or `And:`/`Or:`/`Negate:` glue.
    filters: Vec<String>,
    /// Other headers (Limit, Wait*, ResponseHeader, KeepAlive, ...).
    headers: Vec<String>,
    output_format: Option<OutputFormat>,
    /// None = unset; Some(true/false) -> `ColumnHeaders: on/off`.
    column_headers: Option<bool>,
}

impl LivestatusQuery {
    /// Constructs a new builder for the given table.
    pub fn new<T, I, S>(table: T, columns: I) -> Self
    where
        T: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            filters: Vec::new(),
            headers: Vec::new(),
            output_format: None,
            column_headers: None,
        }
    }

    /// The table this query targets.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Replaces the column list.
    pub fn columns<I, S>(&mut self, cols: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = cols.into_iter().map(Into::into).collect();
        self
    }

    /// Appends to the column list.
    pub fn add_columns<I, S>(&mut self, cols: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(cols.into_iter().map(Into::into));
        self
    }

    /// Sets the desired output format (csv/json/python).
    pub fn output_format(&mut self, format: OutputFormat) -> &mut Self {
        self.output_format = Some(format);
        self
    }

    /// Toggles `ColumnHeaders: on/off`. Emitted only when explicitly set.
    pub fn column_headers(&mut self, on: bool) -> &mut Self {
        self.column_headers = Some(on);
        self
    }

    /// Appends a generic filter: `Filter: <column> <op> <value>`.
    pub fn filter(&mut self, column: &str, op: Op, value: &str) -> &mut Self {
        self.filters.push(format!(
            "Filter: {} {} {}",
            safe_token(column),
            op,
            safe_value(value)
        ));
        self
    }

    pub fn filter_equal(&mut self, column: &str, value: &str) -> &mut Self {
        self.filter(column, Op::Equal, value)
    }

    pub fn filter_not_equal(&mut self, column: &str, value: &str) -> &mut Self {
        self.filter(column, Op::NotEqual, value)
    }

    pub fn filter_less_than(&mut self, column: &str, value: &str) -> &mut Self {
        self.filter(column, Op::LessThan, value)
    }

    pub fn filter_less_or_equal(&mut self, column: &str, value: &str) -> &mut Self {
        self.filter(column, Op::LessOrEqual, value)
    }

    pub fn filter_greater_than(&mut self, column: &str, value: &str) -> &mut Self {
        self.filter(column, Op::GreaterThan, value)
    }

    pub fn filter_greater_or_equal(&mut self, column: &str, value: &str) -> &mut Self {
        self.filter(column, Op::GreaterOrEqual, value)
    }

    pub fn filter_regex(&mut self, column: &str, pattern: &str) -> &mut Self {
        self.filter(column, Op::Regex, pattern)
    }

    pub fn filter_regex_icase(&mut self, column: &str, pattern: &str) -> &mut Self {
        self.filter(column, Op::RegexIcase, pattern)
    }

    /// Appends `And: n`, gluing the n most recent filter expressions.
    ///
    /// Composition is strictly positional; n is not range-checked here, the
    /// server rejects out-of-range glue.
    pub fn and(&mut self, n: usize) -> &mut Self {
        self.filters.push(format!("And: {n}"));
        self
    }

    /// Appends `Or: n`, gluing the n most recent filter expressions.
    pub fn or(&mut self, n: usize) -> &mut Self {
        self.filters.push(format!("Or: {n}"));
        self
    }

    /// Appends `Negate:`, flipping the most recent expression.
    pub fn negate(&mut self) -> &mut Self {
        self.filters.push("Negate:".to_string());
        self
    }

    /// Appends `Limit: n`.
    pub fn limit(&mut self, n: u64) -> &mut Self {
        self.headers.push(format!("Limit: {n}"));
        self
    }

    pub fn wait_object(&mut self, object: &str) -> &mut Self {
        self.headers
            .push(format!("WaitObject: {}", safe_value(object)));
        self
    }

    /// Appends `WaitTrigger: <trigger>`. The server accepts
    /// check|state|log|downtime|comment|command|program|all; the builder does
    /// not enforce the set.
    pub fn wait_trigger(&mut self, trigger: &str) -> &mut Self {
        self.headers
            .push(format!("WaitTrigger: {}", safe_token(trigger)));
        self
    }

    pub fn wait_condition(&mut self, condition: &str) -> &mut Self {
        self.headers
            .push(format!("WaitCondition: {}", safe_value(condition)));
        self
    }

    pub fn wait_timeout(&mut self, ms: u64) -> &mut Self {
        self.headers.push(format!("WaitTimeout: {ms}"));
        self
    }

    /// Appends `Localtime: <unix seconds>`.
    pub fn localtime(&mut self, ts: i64) -> &mut Self {
        self.headers.push(format!("Localtime: {ts}"));
        self
    }

    pub fn keep_alive(&mut self, on: bool) -> &mut Self {
        self.headers
            .push(format!("KeepAlive: {}", if on { "on" } else { "off" }));
        self
    }

    pub fn response_header_fixed16(&mut self) -> &mut Self {
        self.headers.push("ResponseHeader: fixed16".to_string());
        self
    }

    pub fn response_header_off(&mut self) -> &mut Self {
        self.headers.push("ResponseHeader: off".to_string());
        self
    }

    /// Escape hatch for Stats:, Group*, and any advanced headers.
    ///
    /// One trailing `:` is stripped from the key, then the key is trimmed; an
    /// empty key drops the call silently. An empty (post-sanitisation) value
    /// yields `Key:` with no trailing space.
    pub fn header(&mut self, key: &str, value: &str) -> &mut Self {
        let key = safe_token(key.strip_suffix(':').unwrap_or(key));
        if key.is_empty() {
            return self;
        }
        let value = safe_value(value);
        if value.is_empty() {
            self.headers.push(format!("{key}:"));
        } else {
            self.headers.push(format!("{key}: {value}"));
        }
        self
    }

    /// Assembles the final LQL request, terminated by a blank line.
    ///
    /// Order: `GET <table>`, `Columns:` (when non-empty), filter lines in
    /// insertion order, `ColumnHeaders:` (when set), header lines in
    /// insertion order, `OutputFormat:` (when set), blank line.
    pub fn build(&self) -> String {
        let mut lines: Vec<String> =
            Vec::with_capacity(self.filters.len() + self.headers.len() + 4);
        lines.push(format!("GET {}", safe_token(&self.table)));
        if !self.columns.is_empty() {
            let cols: Vec<String> = self.columns.iter().map(|c| safe_token(c)).collect();
            lines.push(format!("Columns: {}", cols.join(" ")));
        }
        lines.extend(self.filters.iter().cloned());
        if let Some(on) = self.column_headers {
            lines.push(format!("ColumnHeaders: {}", if on { "on" } else { "off" }));
        }
        lines.extend(self.headers.iter().cloned());
        if let Some(format) = self.output_format {
            lines.push(format!("OutputFormat: {format}"));
        }
        let mut out = lines.join("\n");
        out.push_str("\n\n");
        out
    }
}

/// Removes CR/LF and trims. Tokens (table names, column names, header keys,
/// trigger names) must not smuggle line breaks into the request.
fn safe_token(s: &str) -> String {
    s.replace('\r', " ").replace('\n', " ").trim().to_string()
}

/// Strips NUL and replaces CR/LF with a space. Livestatus has no quoting;
/// inner spaces are significant (regex patterns, WaitCondition text), so the
/// value is not trimmed.
fn safe_value(s: &str) -> String {
    s.replace('\0', "").replace('\r', " ").replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_build() {
        let mut q = LivestatusQuery::new("hosts", ["name", "state"]);
        q.output_format(OutputFormat::Json).limit(10);

        assert_eq!(
            q.build(),
            "GET hosts\nColumns: name state\nLimit: 10\nOutputFormat: json\n\n"
        );
    }

    #[test]
    fn filters_and_bool_glue() {
        let mut q = LivestatusQuery::new("services", ["host_name", "description", "state"]);
        q.filter_equal("state", "2")
            .filter_equal("acknowledged", "0")
            .and(2)
            .filter_regex_icase("description", "http.*backend")
            .or(2)
            .output_format(OutputFormat::Csv);

        let built = q.build();
        let lines: Vec<&str> = built.lines().collect();
        assert_eq!(lines[0], "GET services");
        assert_eq!(lines[1], "Columns: host_name description state");
        assert_eq!(lines[2], "Filter: state = 2");
        assert_eq!(lines[3], "Filter: acknowledged = 0");
        assert_eq!(lines[4], "And: 2");
        assert_eq!(lines[5], "Filter: description ~~ http.*backend");
        assert_eq!(lines[6], "Or: 2");
        assert_eq!(lines[7], "OutputFormat: csv");
        assert!(built.ends_with("\n\n"));
    }

    #[test]
    fn column_headers_and_keep_alive() {
        let mut q = LivestatusQuery::new("hosts", ["name"]);
        q.column_headers(true)
            .response_header_fixed16()
            .keep_alive(true)
            .output_format(OutputFormat::Json);

        assert_eq!(
            q.build(),
            "GET hosts\nColumns: name\nColumnHeaders: on\nResponseHeader: fixed16\n\
             KeepAlive: on\nOutputFormat: json\n\n"
        );
    }

    #[test]
    fn column_headers_unset_is_not_emitted() {
        let q = LivestatusQuery::new("hosts", ["name"]);
        assert!(!q.build().contains("ColumnHeaders"));

        let mut q = LivestatusQuery::new("hosts", ["name"]);
        q.column_headers(false);
        assert!(q.build().contains("ColumnHeaders: off"));
    }

    #[test]
    fn wait_helpers() {
        let mut q = LivestatusQuery::new("status", Vec::<String>::new());
        q.wait_trigger("log")
            .wait_object("host;my host with spaces")
            .wait_condition("class = 3")
            .wait_timeout(5000);

        assert_eq!(
            q.build(),
            "GET status\nWaitTrigger: log\nWaitObject: host;my host with spaces\n\
             WaitCondition: class = 3\nWaitTimeout: 5000\n\n"
        );
    }

    #[test]
    fn header_injection_and_sanitization() {
        let mut q = LivestatusQuery::new("services", ["host_name"]);
        q.filter_equal("host_name", "bad\r\nname") // CRLF must not survive
            .header("Stats:    ", "state = 2")
            .header("Localtime", "1724000000\n")
            .header("WeirdEmpty", "")
            .output_format(OutputFormat::Csv);

        let built = q.build();
        let lines: Vec<&str> = built.lines().collect();
        assert_eq!(lines[0], "GET services");
        assert_eq!(lines[1], "Columns: host_name");
        assert_eq!(lines[2], "Filter: host_name = bad  name");
        assert_eq!(lines[3], "Stats:: state = 2");
        assert_eq!(lines[4], "Localtime: 1724000000 ");
        assert_eq!(lines[5], "WeirdEmpty:");
        assert_eq!(lines[6], "OutputFormat: csv");
    }

    #[test]
    fn header_empty_key_is_dropped() {
        let mut q = LivestatusQuery::new("hosts", Vec::<String>::new());
        q.header("   ", "value").header(":", "value");
        assert_eq!(q.build(), "GET hosts\n\n");
    }

    #[test]
    fn nul_and_crlf_never_rendered() {
        let mut q = LivestatusQuery::new("ho\rsts", ["na\nme"]);
        q.filter_equal("col\r\numn", "va\x00l\r\nue")
            .wait_condition("a\x00b\nc")
            .header("K\rey", "v\nv");

        let built = q.build();
        for line in built.lines() {
            assert!(!line.contains('\r'), "CR leaked into {line:?}");
            assert!(!line.contains('\0'), "NUL leaked into {line:?}");
        }
        // CR/LF become single spaces, NUL is removed outright.
        assert!(built.contains("Filter: col  umn = val  ue"));
        assert!(built.contains("WaitCondition: ab c"));
    }

    #[test]
    fn insertion_order_is_preserved() {
        let mut q = LivestatusQuery::new("services", Vec::<String>::new());
        q.filter_equal("a", "1")
            .negate()
            .filter_equal("b", "2")
            .or(2)
            .limit(5)
            .header("Stats", "sum latency")
            .localtime(1724000000);

        let built = q.build();
        let lines: Vec<&str> = built.lines().collect();
        assert_eq!(
            &lines[1..=4],
            &["Filter: a = 1", "Negate:", "Filter: b = 2", "Or: 2"]
        );
        assert_eq!(
            &lines[5..=7],
            &["Limit: 5", "Stats: sum latency", "Localtime: 1724000000"]
        );
    }

    #[test]
    fn columns_replace_and_append() {
        let mut q = LivestatusQuery::new("hosts", ["name"]);
        q.columns(["address"]).add_columns(["state", "plugin_output"]);
        assert!(q
            .build()
            .contains("Columns: address state plugin_output"));
    }

    #[test]
    fn build_always_ends_with_blank_line() {
        let cases = [
            LivestatusQuery::new("hosts", Vec::<String>::new()),
            LivestatusQuery::new("services", ["a", "b"]),
        ];
        for q in &cases {
            let built = q.build();
            assert!(built.ends_with("\n\n"), "missing blank line: {built:?}");
            assert!(built.starts_with("GET "));
        }
    }
}
