use crate::error::{TrainingError, TrainingResult};
use crate::job::DatasetId;
use chrono::{DateTime, Utc};
use refinery_abstraction::KnowledgeRecord;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fraction of each dataset that goes to the training split.
pub const TRAIN_FRACTION: f64 = 0.8;

/// A named collection of samples, read-only to the engine.
///
/// Samples live in the metadata blob under `all_samples`, falling back to
/// `samples_preview` for datasets that were only partially loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: DatasetId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub sample_count: i64,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl Dataset {
    /// Raw sample values as stored.
    #[must_use]
    pub fn raw_samples(&self) -> &[Value] {
        let samples = self
            .metadata
            .get("all_samples")
            .or_else(|| self.metadata.get("samples_preview"));
        samples.and_then(Value::as_array).map_or(&[], Vec::as_slice)
    }

    /// Samples normalized to the canonical shape; unusable records are dropped.
    #[must_use]
    pub fn training_samples(&self) -> Vec<SampleRecord> {
        self.raw_samples().iter().filter_map(normalize_sample).collect()
    }

    /// Retrieval records built from this dataset's samples.
    #[must_use]
    pub fn knowledge_records(&self) -> Vec<KnowledgeRecord> {
        self.training_samples()
            .into_iter()
            .filter_map(|sample| sample.into_knowledge_record(&self.name, self.id))
            .collect()
    }
}

/// Input for importing a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDataset {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub samples: Vec<Value>,
}

impl NewDataset {
    /// Metadata blob persisted alongside the dataset.
    #[must_use]
    pub fn metadata(&self) -> Value {
        serde_json::json!({ "all_samples": self.samples })
    }

    pub fn validate(&self) -> TrainingResult<()> {
        if self.name.trim().is_empty() {
            return Err(TrainingError::Dataset("dataset name is required".to_string()));
        }
        Ok(())
    }
}

/// Canonical training sample.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub instruction: String,
    pub input: String,
    pub output: String,
    pub system: String,
}

impl SampleRecord {
    /// Retrieval context: the non-empty prompt parts, one per line.
    #[must_use]
    pub fn context(&self) -> String {
        [("Instruction", &self.instruction), ("Input", &self.input), ("System", &self.system)]
            .into_iter()
            .filter(|(_, value)| !value.trim().is_empty())
            .map(|(label, value)| format!("{label}: {value}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn into_knowledge_record(self, source: &str, dataset_id: DatasetId) -> Option<KnowledgeRecord> {
        let context = self.context();
        if context.is_empty() || self.output.trim().is_empty() {
            return None;
        }
        Some(KnowledgeRecord {
            context,
            response: self.output,
            instruction: self.instruction,
            input: self.input,
            system: self.system,
            source: source.to_string(),
            dataset_id: dataset_id.0,
        })
    }
}

/// Ordered train/validation split.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleSplit {
    pub train: Vec<SampleRecord>,
    pub val: Vec<SampleRecord>,
}

impl SampleSplit {
    /// Splits one dataset's samples, keeping order. `train` gets `floor(0.8 * n)`.
    #[must_use]
    pub fn from_samples(mut samples: Vec<SampleRecord>) -> Self {
        let cut = (samples.len() as f64 * TRAIN_FRACTION).floor() as usize;
        let val = samples.split_off(cut);
        Self { train: samples, val }
    }

    pub fn extend(&mut self, other: Self) {
        self.train.extend(other.train);
        self.val.extend(other.val);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.train.len() + self.val.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Converts every dataset, splits each one, and aggregates the splits.
///
/// Fails with [`TrainingError::NoTrainingSamples`] naming every dataset
/// attempted, `missing` ids included, when the aggregated training split is
/// empty.
pub fn convert_datasets(datasets: &[Dataset], missing: &[DatasetId]) -> TrainingResult<SampleSplit> {
    let mut split = SampleSplit::default();
    for dataset in datasets {
        let samples = dataset.training_samples();
        tracing::debug!(
            dataset_id = %dataset.id,
            dataset = %dataset.name,
            raw = dataset.raw_samples().len(),
            converted = samples.len(),
            "Converted dataset samples"
        );
        split.extend(SampleSplit::from_samples(samples));
    }

    if split.train.is_empty() {
        let attempted = datasets
            .iter()
            .map(|d| d.name.clone())
            .chain(missing.iter().map(|id| format!("#{id} (missing)")))
            .collect();
        return Err(TrainingError::NoTrainingSamples(attempted));
    }
    Ok(split)
}

/// Normalizes one raw sample. Returns `None` when neither an instruction nor
/// an output can be derived.
#[must_use]
pub fn normalize_sample(raw: &Value) -> Option<SampleRecord> {
    let record = match raw {
        Value::Object(map) => normalize_object(map),
        Value::String(text) => SampleRecord { instruction: text.clone(), ..SampleRecord::default() },
        _ => return None,
    };

    if record.instruction.trim().is_empty() && record.output.trim().is_empty() {
        None
    } else {
        Some(record)
    }
}

fn normalize_object(map: &Map<String, Value>) -> SampleRecord {
    let has_any = |keys: &[&str]| keys.iter().any(|k| map.contains_key(*k));

    if has_any(&["instruction", "Instruction", "output", "Response"]) {
        SampleRecord {
            instruction: first_text(map, &["instruction", "Instruction"]),
            input: first_text(map, &["input", "Input"]),
            output: first_text(map, &["output", "Output", "Response", "response"]),
            system: first_text(map, &["system", "System"]),
        }
    } else if let Some(content) = map.get("content") {
        normalize_content(content)
    } else if has_any(&["question", "answer"]) {
        SampleRecord {
            instruction: first_text(map, &["question"]),
            input: first_text(map, &["context", "input"]),
            output: first_text(map, &["answer"]),
            system: first_text(map, &["system"]),
        }
    } else {
        SampleRecord {
            instruction: first_text(map, &["text", "input", "prompt", "question"]),
            input: String::new(),
            output: first_text(map, &["response", "answer", "code", "solution"]),
            system: first_text(map, &["system"]),
        }
    }
}

fn normalize_content(content: &Value) -> SampleRecord {
    let nested = match content {
        Value::Object(map) => Some(map.clone()),
        Value::String(text) => parse_literal_map(text),
        _ => None,
    };

    match nested {
        Some(map) => SampleRecord {
            instruction: first_text(&map, &["Instruction", "instruction", "Prompt", "prompt"]),
            input: first_text(&map, &["input", "Input"]),
            output: first_text(&map, &["Response", "response", "Output", "output"]),
            system: first_text(&map, &["system", "System"]),
        },
        None => SampleRecord {
            instruction: value_text(content),
            ..SampleRecord::default()
        },
    }
}

fn first_text(map: &Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|key| map.get(*key))
        .map(value_text)
        .find(|text| !text.trim().is_empty())
        .unwrap_or_default()
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parses a stringified mapping, either JSON or a single-quoted literal such
/// as `{'Instruction': 'x', 'Response': 'y'}`.
fn parse_literal_map(text: &str) -> Option<Map<String, Value>> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) {
        return Some(map);
    }
    LiteralParser::new(text).parse_map()
}

struct LiteralParser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> LiteralParser<'a> {
    fn new(text: &'a str) -> Self {
        Self { chars: text.chars().peekable() }
    }

    fn skip_ws(&mut self) {
        while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn expect(&mut self, want: char) -> Option<()> {
        self.skip_ws();
        (self.chars.next()? == want).then_some(())
    }

    fn parse_map(mut self) -> Option<Map<String, Value>> {
        self.expect('{')?;
        let mut map = Map::new();
        loop {
            self.skip_ws();
            match self.chars.peek()? {
                '}' => {
                    self.chars.next();
                    return Some(map);
                }
                ',' => {
                    self.chars.next();
                }
                _ => {
                    let key = self.parse_string()?;
                    self.expect(':')?;
                    self.skip_ws();
                    let value = match self.chars.peek()? {
                        '\'' | '"' => Value::String(self.parse_string()?),
                        _ => self.parse_bare(),
                    };
                    map.insert(key, value);
                }
            }
        }
    }

    fn parse_string(&mut self) -> Option<String> {
        self.skip_ws();
        let quote = self.chars.next().filter(|c| *c == '\'' || *c == '"')?;
        let mut out = String::new();
        loop {
            match self.chars.next()? {
                '\\' => match self.chars.next()? {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    other => out.push(other),
                },
                c if c == quote => return Some(out),
                c => out.push(c),
            }
        }
    }

    fn parse_bare(&mut self) -> Value {
        let mut raw = String::new();
        while let Some(c) = self.chars.peek().copied() {
            if c == ',' || c == '}' {
                break;
            }
            raw.push(c);
            self.chars.next();
        }
        match raw.trim() {
            "None" => Value::Null,
            "True" => Value::Bool(true),
            "False" => Value::Bool(false),
            other => serde_json::from_str(other).unwrap_or_else(|_| Value::String(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dataset(id: i64, samples: Value) -> Dataset {
        Dataset {
            id: DatasetId(id),
            name: format!("ds-{id}"),
            description: None,
            sample_count: samples.as_array().map_or(0, |a| a.len() as i64),
            metadata: json!({ "all_samples": samples }),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_direct_instruction_output() {
        let record =
            normalize_sample(&json!({"instruction": "Add", "input": "1+1", "output": "2"})).unwrap();
        assert_eq!(record.instruction, "Add");
        assert_eq!(record.input, "1+1");
        assert_eq!(record.output, "2");
    }

    #[test]
    fn test_capitalized_keys() {
        let record = normalize_sample(&json!({"Instruction": "Deploy", "Response": "kubectl apply"}))
            .unwrap();
        assert_eq!(record.instruction, "Deploy");
        assert_eq!(record.output, "kubectl apply");
    }

    #[test]
    fn test_stringified_content() {
        let raw = json!({"content": "{'Instruction': 'Restart nginx', 'Prompt': '', 'Response': 'systemctl restart nginx'}"});
        let record = normalize_sample(&raw).unwrap();
        assert_eq!(record.instruction, "Restart nginx");
        assert_eq!(record.output, "systemctl restart nginx");
    }

    #[test]
    fn test_content_with_escaped_quote() {
        let raw = json!({"content": "{'Instruction': 'Say \\'hi\\'', 'Response': \"it's fine\"}"});
        let record = normalize_sample(&raw).unwrap();
        assert_eq!(record.instruction, "Say 'hi'");
        assert_eq!(record.output, "it's fine");
    }

    #[test]
    fn test_question_answer() {
        let record = normalize_sample(&json!({"question": "Capital of France?", "answer": "Paris"}))
            .unwrap();
        assert_eq!(record.instruction, "Capital of France?");
        assert_eq!(record.output, "Paris");
    }

    #[test]
    fn test_unrecognized_shape() {
        let record = normalize_sample(&json!({"prompt": "sort a list", "code": "xs.sort()"})).unwrap();
        assert_eq!(record.instruction, "sort a list");
        assert_eq!(record.output, "xs.sort()");
    }

    #[test]
    fn test_unusable_records_dropped() {
        assert!(normalize_sample(&json!({"label": 3})).is_none());
        assert!(normalize_sample(&json!({"instruction": "", "output": ""})).is_none());
        assert!(normalize_sample(&json!(42)).is_none());
    }

    #[test]
    fn test_preview_fallback() {
        let mut ds = dataset(1, json!([]));
        ds.metadata = json!({"samples_preview": [{"instruction": "a", "output": "b"}]});
        assert_eq!(ds.training_samples().len(), 1);
    }

    #[test]
    fn test_split_counts() {
        let mut samples = Vec::new();
        for i in 0..7 {
            samples.push(json!({"instruction": format!("q{i}"), "output": "a"}));
        }
        for _ in 0..3 {
            samples.push(json!({"noise": true}));
        }
        let split = convert_datasets(&[dataset(1, Value::Array(samples))], &[]).unwrap();
        assert_eq!(split.train.len(), 5);
        assert_eq!(split.len(), 7);
        assert_eq!(split.train[0].instruction, "q0");
        assert_eq!(split.val[0].instruction, "q5");
    }

    #[test]
    fn test_split_is_per_dataset() {
        let a = dataset(1, json!([{"instruction": "a1", "output": "x"}, {"instruction": "a2", "output": "x"}]));
        let b = dataset(2, json!([
            {"instruction": "b1", "output": "x"},
            {"instruction": "b2", "output": "x"},
            {"instruction": "b3", "output": "x"},
            {"instruction": "b4", "output": "x"},
            {"instruction": "b5", "output": "x"}
        ]));
        let split = convert_datasets(&[a, b], &[]).unwrap();
        let train: Vec<_> = split.train.iter().map(|s| s.instruction.as_str()).collect();
        assert_eq!(train, vec!["a1", "b1", "b2", "b3", "b4"]);
        assert_eq!(split.val.len(), 2);
    }

    #[test]
    fn test_no_training_samples_error_names_datasets() {
        let err = convert_datasets(&[dataset(4, json!([{"junk": 1}]))], &[]).unwrap_err();
        assert!(matches!(err, TrainingError::NoTrainingSamples(ref names) if names == &["ds-4".to_string()]));
    }

    #[test]
    fn test_no_training_samples_error_names_missing_datasets() {
        let err = convert_datasets(&[], &[DatasetId(999)]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "No training samples found. Valid datasets: [#999 (missing)]"
        );
    }

    #[test]
    fn test_knowledge_records() {
        let ds = dataset(9, json!([
            {"instruction": "What is RAM?", "input": "", "output": "Memory", "system": "Be brief"},
            {"instruction": "No answer"}
        ]));
        let records = ds.knowledge_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].context, "Instruction: What is RAM?\nSystem: Be brief");
        assert_eq!(records[0].response, "Memory");
        assert_eq!(records[0].source, "ds-9");
        assert_eq!(records[0].dataset_id, 9);
    }
}
