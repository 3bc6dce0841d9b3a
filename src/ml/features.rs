use crate::config::FeatureSchemaConfig;
use crate::error::{AppError, Result};
use crate::metrics::{ROWS_DROPPED_TOTAL, UNSEEN_CATEGORIES_TOTAL};
use crate::models::{RawRecord, RawTable};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Ordered column declaration. The feature vector is the categorical block
/// followed by the numeric block, each in declared order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub categorical: Vec<String>,
    pub numeric: Vec<String>,
    /// Required only when fitting for training
    pub target: Option<String>,
}

impl FeatureSchema {
    pub fn new(categorical: Vec<String>, numeric: Vec<String>) -> Self {
        Self {
            categorical,
            numeric,
            target: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Feature names in the order the model consumes them
    pub fn feature_order(&self) -> Vec<String> {
        self.categorical
            .iter()
            .chain(self.numeric.iter())
            .cloned()
            .collect()
    }

    pub fn n_features(&self) -> usize {
        self.categorical.len() + self.numeric.len()
    }

    fn declared_columns(&self) -> impl Iterator<Item = &String> {
        self.categorical
            .iter()
            .chain(self.numeric.iter())
            .chain(self.target.iter())
    }
}

impl From<&FeatureSchemaConfig> for FeatureSchema {
    fn from(config: &FeatureSchemaConfig) -> Self {
        FeatureSchema::new(config.categorical.clone(), config.numeric.clone())
            .with_target(config.target.clone())
    }
}

/// Per-field mapping from training values to codes `0..n-1`, with code `n`
/// reserved for values never seen during fit.
///
/// Immutable once built: refitting produces a new vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vocabulary {
    field: String,
    values: Vec<String>,
    codes: BTreeMap<String, usize>,
    sentinel: usize,
}

impl Vocabulary {
    /// Build from values in iteration order; the first occurrence of each
    /// distinct value gets the next free code.
    pub fn build<'a, I>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut ordered = Vec::new();
        let mut codes = BTreeMap::new();

        for value in values {
            if !codes.contains_key(value) {
                codes.insert(value.to_string(), ordered.len());
                ordered.push(value.to_string());
            }
        }

        let sentinel = ordered.len();
        Self {
            field: field.into(),
            values: ordered,
            codes,
            sentinel,
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Code for a known value
    pub fn lookup(&self, value: &str) -> Option<usize> {
        self.codes.get(value).copied()
    }

    /// Code for any value; unseen values map to the sentinel
    pub fn encode(&self, value: &str) -> usize {
        self.lookup(value).unwrap_or(self.sentinel)
    }

    /// Inverse lookup. `None` for the sentinel and out-of-range codes.
    pub fn decode(&self, code: usize) -> Option<&str> {
        self.values.get(code).map(String::as_str)
    }

    pub fn sentinel(&self) -> usize {
        self.sentinel
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Normalization parameters for one numeric column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnScaler {
    pub column: String,
    pub mean: f64,
    pub std_dev: f64,
}

impl ColumnScaler {
    pub fn scale(&self, value: f64) -> f64 {
        (value - self.mean) / self.std_dev
    }
}

/// Standard-scaler state over an ordered list of numeric columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerState {
    columns: Vec<ColumnScaler>,
}

impl ScalerState {
    /// Fit mean and population standard deviation per column of `values`
    /// (`n_rows × columns.len()`). A zero deviation is stored as `1.0`.
    pub fn fit(columns: &[String], values: &Array2<f64>) -> Result<Self> {
        if values.ncols() != columns.len() {
            return Err(AppError::Internal(format!(
                "scaler expects {} columns, got {}",
                columns.len(),
                values.ncols()
            )));
        }
        if values.nrows() == 0 {
            return Err(AppError::EmptyInput(
                "cannot fit scaler on zero rows".to_string(),
            ));
        }

        let columns = columns
            .iter()
            .zip(values.axis_iter(Axis(1)))
            .map(|(name, column)| {
                let mean = column.mean().unwrap_or(0.0);
                let std_dev = column.std(0.0);
                ColumnScaler {
                    column: name.clone(),
                    mean,
                    std_dev: if std_dev > 0.0 && std_dev.is_finite() {
                        std_dev
                    } else {
                        1.0
                    },
                }
            })
            .collect();

        Ok(Self { columns })
    }

    pub fn get(&self, column: &str) -> Option<&ColumnScaler> {
        self.columns.iter().find(|c| c.column == column)
    }

    pub fn columns(&self) -> &[ColumnScaler] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.column.clone()).collect()
    }
}

/// Output of `fit`: the feature matrix in `feature_order`, the targets when a
/// target column is declared, and bookkeeping about cleaning.
#[derive(Debug, Clone)]
pub struct TransformedTable {
    pub features: Array2<f64>,
    pub targets: Option<Array1<f64>>,
    pub feature_order: Vec<String>,
    pub rows_loaded: usize,
    pub rows_dropped: usize,
}

/// Everything produced by one fit pass
#[derive(Debug, Clone)]
pub struct FittedTransform {
    pub vocabularies: Vec<Vocabulary>,
    pub scaler: ScalerState,
    pub table: TransformedTable,
}

/// One cleaned row: every required field present and parseable
struct CleanRow {
    categories: Vec<String>,
    numbers: Vec<f64>,
    target: Option<f64>,
}

/// Converts raw records into numeric feature vectors. The same transformer
/// backs both the training path (`fit`) and the serving path (`apply`).
#[derive(Debug, Clone)]
pub struct FeatureTransformer {
    schema: FeatureSchema,
}

impl FeatureTransformer {
    pub fn new(schema: FeatureSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Fit vocabularies and scaler on `table` and transform it.
    ///
    /// Rows missing any declared column, or carrying an unparseable numeric
    /// value, are dropped before anything is fitted. Row order of the
    /// remainder is preserved, so codes are reproducible for a fixed input.
    pub fn fit(&self, table: &RawTable) -> Result<FittedTransform> {
        if table.is_empty() {
            return Err(AppError::EmptyInput("input table has no rows".to_string()));
        }

        for column in self.schema.declared_columns() {
            if !table.has_column(column) {
                return Err(AppError::Schema(format!(
                    "declared column '{}' is absent from the table",
                    column
                )));
            }
        }

        let rows: Vec<CleanRow> = table.iter().filter_map(|r| self.clean_row(r)).collect();
        let rows_dropped = table.len() - rows.len();

        if rows_dropped > 0 {
            warn!(
                rows_dropped,
                rows_loaded = table.len(),
                "Dropped incomplete rows before fitting"
            );
            ROWS_DROPPED_TOTAL.inc_by(rows_dropped as f64);
        }

        if rows.is_empty() {
            return Err(AppError::EmptyInput(format!(
                "no complete rows remain after cleaning {} rows",
                table.len()
            )));
        }

        let vocabularies: Vec<Vocabulary> = self
            .schema
            .categorical
            .iter()
            .enumerate()
            .map(|(i, field)| {
                Vocabulary::build(field.clone(), rows.iter().map(|r| r.categories[i].as_str()))
            })
            .collect();

        let n_rows = rows.len();
        let n_cat = self.schema.categorical.len();
        let n_num = self.schema.numeric.len();

        let numeric = Array2::from_shape_fn((n_rows, n_num), |(i, j)| rows[i].numbers[j]);
        let scaler = ScalerState::fit(&self.schema.numeric, &numeric)?;

        let mut features = Array2::zeros((n_rows, n_cat + n_num));
        for (i, row) in rows.iter().enumerate() {
            for (j, vocab) in vocabularies.iter().enumerate() {
                features[[i, j]] = vocab.encode(&row.categories[j]) as f64;
            }
            for (j, column) in scaler.columns().iter().enumerate() {
                features[[i, n_cat + j]] = column.scale(row.numbers[j]);
            }
        }

        let targets = self
            .schema
            .target
            .as_ref()
            .map(|_| rows.iter().filter_map(|r| r.target).collect::<Array1<f64>>());

        debug!(
            rows = n_rows,
            features = n_cat + n_num,
            "Fitted feature transform"
        );

        Ok(FittedTransform {
            vocabularies,
            scaler,
            table: TransformedTable {
                features,
                targets,
                feature_order: self.schema.feature_order(),
                rows_loaded: table.len(),
                rows_dropped,
            },
        })
    }

    /// Transform one record with committed state, assembling the vector
    /// strictly in `feature_order`.
    ///
    /// Unseen categorical values become the vocabulary's sentinel code.
    pub fn apply(
        record: &RawRecord,
        vocabularies: &[Vocabulary],
        scaler: &ScalerState,
        feature_order: &[String],
    ) -> Result<Vec<f64>> {
        let mut vector = Vec::with_capacity(feature_order.len());

        for name in feature_order {
            if let Some(vocab) = vocabularies.iter().find(|v| v.field() == name) {
                let value = record
                    .categorical(name)
                    .ok_or_else(|| AppError::MissingField(name.clone()))?;
                let code = match vocab.lookup(&value) {
                    Some(code) => code,
                    None => {
                        debug!(field = %name, value = %value, "Unseen category, using sentinel code");
                        UNSEEN_CATEGORIES_TOTAL.with_label_values(&[name.as_str()]).inc();
                        vocab.sentinel()
                    }
                };
                vector.push(code as f64);
            } else if let Some(column) = scaler.get(name) {
                let value = record
                    .numeric(name)?
                    .ok_or_else(|| AppError::MissingField(name.clone()))?;
                vector.push(column.scale(value));
            } else {
                return Err(AppError::Schema(format!(
                    "feature '{}' has neither a vocabulary nor scaler parameters",
                    name
                )));
            }
        }

        Ok(vector)
    }

    fn clean_row(&self, record: &RawRecord) -> Option<CleanRow> {
        let categories = self
            .schema
            .categorical
            .iter()
            .map(|c| record.categorical(c))
            .collect::<Option<Vec<_>>>()?;

        let numbers = self
            .schema
            .numeric
            .iter()
            .map(|c| record.numeric(c).ok().flatten())
            .collect::<Option<Vec<_>>>()?;

        let target = match &self.schema.target {
            Some(column) => Some(record.numeric(column).ok().flatten()?),
            None => None,
        };

        Some(CleanRow {
            categories,
            numbers,
            target,
        })
    }
}
