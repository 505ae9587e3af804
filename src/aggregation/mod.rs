//! # Aggregation
//!
//! Reduces a stream of [`TimestampedRecord`]s into boundary-aligned,
//! time-windowed [`AggResult`]s. [`Accumulator`] is the streaming state
//! machine used by push-sink adapters; [`aggregate_batch`] is the
//! non-streaming equivalent used by range-query adapters.


use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;
use tracing::trace;

// ------------------------------------------------------------------------------------------------
// Errors
// ------------------------------------------------------------------------------------------------

/// Errors produced by aggregation configuration parsing.
#[derive(Debug, Error)]
pub enum AggregationError {
    /// `field_fns` syntax (`"name:fn,name:fn"`) failed to parse.
    #[error("invalid field function spec {0:?}: {1}")]
    InvalidFieldFnSpec(String, String),

    /// A function name in a `field_fns` spec wasn't recognized.
    #[error("unknown aggregation function {0:?}")]
    UnknownFunction(String),

    /// `window` was not a positive duration.
    #[error("window must be a positive nanosecond duration, got {0}")]
    InvalidWindow(i64),
}

// ------------------------------------------------------------------------------------------------
// TimestampedRecord
// ------------------------------------------------------------------------------------------------

/// One record in the stream being aggregated.
#[derive(Debug, Clone)]
pub struct TimestampedRecord {
    /// Record timestamp, nanoseconds.
    pub ts: i64,
    /// Field name -> value.
    pub fields: BTreeMap<String, Value>,
}

impl TimestampedRecord {
    /// Creates a record from a timestamp and field map.
    pub fn new(ts: i64, fields: BTreeMap<String, Value>) -> Self {
        TimestampedRecord { ts, fields }
    }
}

// ------------------------------------------------------------------------------------------------
// AggFn
// ------------------------------------------------------------------------------------------------

/// A reduction function applied to one field across a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFn {
    /// Arithmetic mean. Numeric only.
    Avg,
    /// Sum. Numeric only.
    Sum,
    /// Minimum. Numeric only.
    Min,
    /// Maximum. Numeric only.
    Max,
    /// Count of values seen (any type).
    Count,
    /// First value seen in the window (any type).
    First,
    /// Last value seen in the window (any type).
    Last,
}

impl AggFn {
    fn parse(s: &str) -> Result<Self, AggregationError> {
        match s {
            "avg" => Ok(AggFn::Avg),
            "sum" => Ok(AggFn::Sum),
            "min" => Ok(AggFn::Min),
            "max" => Ok(AggFn::Max),
            "count" => Ok(AggFn::Count),
            "first" => Ok(AggFn::First),
            "last" => Ok(AggFn::Last),
            other => Err(AggregationError::UnknownFunction(other.to_string())),
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            AggFn::Avg => "avg",
            AggFn::Sum => "sum",
            AggFn::Min => "min",
            AggFn::Max => "max",
            AggFn::Count => "count",
            AggFn::First => "first",
            AggFn::Last => "last",
        }
    }

    fn is_numeric_only(self) -> bool {
        matches!(self, AggFn::Avg | AggFn::Sum | AggFn::Min | AggFn::Max)
    }
}

/// Parses a `"field:fn,field:fn"` spec, e.g. `"cpu:avg,mem:max,status:last"`.
/// A field may list more than one function separated by `|` within the
/// same entry is not supported; instead list the field multiple times,
/// e.g. `"cpu:avg,cpu:max"`, and entries accumulate.
pub fn parse_field_fns(spec: &str) -> Result<BTreeMap<String, Vec<AggFn>>, AggregationError> {
    let mut out: BTreeMap<String, Vec<AggFn>> = BTreeMap::new();
    if spec.trim().is_empty() {
        return Ok(out);
    }
    for entry in spec.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (name, func) = entry.split_once(':').ok_or_else(|| {
            AggregationError::InvalidFieldFnSpec(entry.to_string(), "missing ':'".into())
        })?;
        let func = AggFn::parse(func.trim())?;
        out.entry(name.trim().to_string()).or_default().push(func);
    }
    Ok(out)
}

// ------------------------------------------------------------------------------------------------
// AggConfig
// ------------------------------------------------------------------------------------------------

/// Aggregation window and function configuration.
#[derive(Debug, Clone)]
pub struct AggConfig {
    /// Window width in nanoseconds; must be positive.
    pub window: i64,
    /// Function applied to fields with no entry in `field_fns`. When
    /// `None`, numeric fields default to [`AggFn::Avg`] and non-numeric
    /// fields default to [`AggFn::Last`].
    pub default_fn: Option<AggFn>,
    /// Explicit per-field function lists.
    pub field_fns: BTreeMap<String, Vec<AggFn>>,
    /// Optional hint for whether a field is numeric, e.g. populated from
    /// a store's current [`crate::schema::Schema`]. Fields absent here
    /// are sniffed from the first observed value.
    pub numeric_hint: BTreeMap<String, bool>,
}

impl AggConfig {
    /// Creates a config with no explicit per-field overrides.
    pub fn new(window: i64) -> Result<Self, AggregationError> {
        if window <= 0 {
            return Err(AggregationError::InvalidWindow(window));
        }
        Ok(AggConfig {
            window,
            default_fn: None,
            field_fns: BTreeMap::new(),
            numeric_hint: BTreeMap::new(),
        })
    }

    fn fns_for(&self, field: &str, sample: &Value) -> Vec<AggFn> {
        if let Some(fns) = self.field_fns.get(field) {
            return fns.clone();
        }
        match self.default_fn {
            Some(f) => vec![f],
            None => {
                let is_numeric = self
                    .numeric_hint
                    .get(field)
                    .copied()
                    .unwrap_or_else(|| sample.is_number());
                vec![if is_numeric { AggFn::Avg } else { AggFn::Last }]
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// AggResult
// ------------------------------------------------------------------------------------------------

/// The reduction of one window.
#[derive(Debug, Clone, PartialEq)]
pub struct AggResult {
    /// The (exclusive) end timestamp of the window this result covers.
    pub window_end_ts: i64,
    /// Number of records folded into this window.
    pub count: u64,
    /// `true` if this result was produced by [`Accumulator::flush`]
    /// rather than a natural window close.
    pub partial: bool,
    /// Computed field values, keyed `name` (single function) or
    /// `name_fn` (multiple functions for the same field).
    pub fields: BTreeMap<String, Value>,
}

// ------------------------------------------------------------------------------------------------
// FieldAcc — per-field running state within one window
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct FieldAcc {
    total_count: u64,
    numeric_sum: f64,
    numeric_count: u64,
    numeric_min: f64,
    numeric_max: f64,
    first_value: Option<Value>,
    last_value: Option<Value>,
}

impl FieldAcc {
    fn add(&mut self, value: &Value) {
        self.total_count += 1;
        if self.first_value.is_none() {
            self.first_value = Some(value.clone());
        }
        self.last_value = Some(value.clone());

        if let Some(n) = value.as_f64() {
            if self.numeric_count == 0 {
                self.numeric_min = n;
                self.numeric_max = n;
            } else {
                self.numeric_min = self.numeric_min.min(n);
                self.numeric_max = self.numeric_max.max(n);
            }
            self.numeric_sum += n;
            self.numeric_count += 1;
        }
    }

    fn eval(&self, func: AggFn) -> Option<Value> {
        match func {
            AggFn::Avg => (self.numeric_count > 0)
                .then(|| Value::from(self.numeric_sum / self.numeric_count as f64)),
            AggFn::Sum => (self.numeric_count > 0).then(|| Value::from(self.numeric_sum)),
            AggFn::Min => (self.numeric_count > 0).then(|| Value::from(self.numeric_min)),
            AggFn::Max => (self.numeric_count > 0).then(|| Value::from(self.numeric_max)),
            AggFn::Count => Some(Value::from(self.total_count)),
            AggFn::First => self.first_value.clone(),
            AggFn::Last => self.last_value.clone(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Accumulator — streaming state machine
// ------------------------------------------------------------------------------------------------

struct Window {
    start: i64,
    end: i64,
    count: u64,
    field_accs: BTreeMap<String, FieldAcc>,
}

/// Streaming time-window accumulator. States: *empty*, *windowing*.
///
/// `add` returns `Some(AggResult)` only when it closes a window (because
/// the new record falls at or past `window_end`). `flush` emits whatever
/// partial window remains, with `partial = true`, only if at least one
/// record has been added since the last emit.
pub struct Accumulator {
    config: AggConfig,
    window: Option<Window>,
}

impl Accumulator {
    /// Creates a new, empty accumulator.
    pub fn new(config: AggConfig) -> Self {
        Accumulator { config, window: None }
    }

    fn window_bounds(&self, ts: i64) -> (i64, i64) {
        let start = ts.div_euclid(self.config.window) * self.config.window;
        (start, start + self.config.window)
    }

    fn open_window(&mut self, ts: i64) {
        let (start, end) = self.window_bounds(ts);
        self.window = Some(Window {
            start,
            end,
            count: 0,
            field_accs: BTreeMap::new(),
        });
    }

    fn fold_into_current(&mut self, record: &TimestampedRecord) {
        let window = self.window.as_mut().expect("window must be open");
        window.count += 1;
        for (name, value) in &record.fields {
            window.field_accs.entry(name.clone()).or_default().add(value);
        }
    }

    fn emit(&self, window: &Window, partial: bool) -> AggResult {
        let mut fields = BTreeMap::new();
        for (name, acc) in &window.field_accs {
            let sample = acc
                .first_value
                .clone()
                .unwrap_or(Value::Null);
            let funcs = self.config.fns_for(name, &sample);
            let multi = funcs.len() > 1;
            for func in funcs {
                if let Some(value) = acc.eval(func) {
                    let key = if multi {
                        format!("{name}_{}", func.suffix())
                    } else {
                        name.clone()
                    };
                    fields.insert(key, value);
                }
            }
        }
        AggResult {
            window_end_ts: window.end,
            count: window.count,
            partial,
            fields,
        }
    }

    /// Folds one record into the accumulator. Returns `Some(result)` when
    /// this record's timestamp falls at or past the current window's end,
    /// closing that window and opening a new one aligned to this record.
    pub fn add(&mut self, record: &TimestampedRecord) -> Option<AggResult> {
        match &self.window {
            None => {
                self.open_window(record.ts);
                self.fold_into_current(record);
                None
            }
            Some(w) if record.ts >= w.end => {
                let closed = self.emit(w, false);
                trace!(window_end = closed.window_end_ts, count = closed.count, "window closed");
                self.open_window(record.ts);
                self.fold_into_current(record);
                Some(closed)
            }
            Some(_) => {
                self.fold_into_current(record);
                None
            }
        }
    }

    /// Emits the current partial window, if any records have been folded
    /// into it, and resets to the empty state.
    pub fn flush(&mut self) -> Option<AggResult> {
        let window = self.window.take()?;
        if window.count == 0 {
            return None;
        }
        Some(self.emit(&window, true))
    }
}

// ------------------------------------------------------------------------------------------------
// Batch aggregation
// ------------------------------------------------------------------------------------------------

/// Sorts `records` by timestamp ascending and folds them through a fresh
/// [`Accumulator`], flushing at the end. The non-streaming equivalent of
/// feeding an `Accumulator` directly, used by range-query adapters.
pub fn aggregate_batch(records: &[TimestampedRecord], config: AggConfig) -> Vec<AggResult> {
    let mut sorted: Vec<&TimestampedRecord> = records.iter().collect();
    sorted.sort_by_key(|r| r.ts);

    let mut acc = Accumulator::new(config);
    let mut results = Vec::new();
    for record in sorted {
        if let Some(result) = acc.add(record) {
            results.push(result);
        }
    }
    if let Some(result) = acc.flush() {
        results.push(result);
    }
    results
}
