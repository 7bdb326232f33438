//! Delimited text files loaded into memory.
//!
//! Column types are inferred from the file unless a type-hint string gives
//! one character per column:
//!
//! | char | type |
//! |------|------|
//! | `c` | text |
//! | `i` | 64-bit integer |
//! | `n`, `d` | double |
//! | `l` | boolean |
//! | `D` | date |
//! | `T` | timestamp (microseconds) |
//! | `t` | time of day (microseconds) |
//! | `?` | inferred |
//! | `_`, `-` | skipped |

use crate::prelude::*;
use arrow::csv::reader::Format;
use arrow::csv::ReaderBuilder;
use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use datafusion::arrow::record_batch::RecordBatch;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument};

const SOURCE_TYPE: &str = "file";

/// Declared type of one file column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Character,
    Integer,
    Number,
    Double,
    Logical,
    Date,
    DateTime,
    Time,
    Guess,
    Skip,
}

impl ColumnType {
    /// Parses one type-hint character.
    pub fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'c' => ColumnType::Character,
            'i' => ColumnType::Integer,
            'n' => ColumnType::Number,
            'd' => ColumnType::Double,
            'l' => ColumnType::Logical,
            'D' => ColumnType::Date,
            'T' => ColumnType::DateTime,
            't' => ColumnType::Time,
            '?' => ColumnType::Guess,
            '_' | '-' => ColumnType::Skip,
            _ => return None,
        })
    }

    /// Returns the Arrow type, or `None` for inferred and skipped columns.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            ColumnType::Character => Some(DataType::Utf8),
            ColumnType::Integer => Some(DataType::Int64),
            ColumnType::Number | ColumnType::Double => Some(DataType::Float64),
            ColumnType::Logical => Some(DataType::Boolean),
            ColumnType::Date => Some(DataType::Date32),
            ColumnType::DateTime => Some(DataType::Timestamp(TimeUnit::Microsecond, None)),
            ColumnType::Time => Some(DataType::Time64(TimeUnit::Microsecond)),
            ColumnType::Guess | ColumnType::Skip => None,
        }
    }

    pub fn is_skip(&self) -> bool {
        *self == ColumnType::Skip
    }
}

/// Parses a type-hint string such as `"ci?_D"`.
///
/// # Errors
///
/// Returns [`TermError::PlanBuild`] naming the first unknown character.
///
/// ```rust
/// use term_agent::sources::{parse_col_types, ColumnType};
///
/// let types = parse_col_types("ci_").unwrap();
/// assert_eq!(types, vec![ColumnType::Character, ColumnType::Integer, ColumnType::Skip]);
/// assert!(parse_col_types("cx").is_err());
/// ```
pub fn parse_col_types(spec: &str) -> Result<Vec<ColumnType>> {
    spec.chars()
        .enumerate()
        .map(|(i, c)| {
            ColumnType::from_char(c).ok_or_else(|| {
                TermError::plan_build(format!(
                    "col_types character '{c}' at position {i} is not one of c i n d l D T t ? _ -"
                ))
            })
        })
        .collect()
}

/// Options for reading delimited files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOptions {
    /// Field delimiter (default: ',')
    pub delimiter: u8,
    /// Whether the first line holds column names
    pub has_header: bool,
    /// Quote character (default: '"')
    pub quote: u8,
    /// Maximum records to read for type inference
    pub schema_infer_max_records: usize,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            has_header: true,
            quote: b'"',
            schema_infer_max_records: 1000,
        }
    }
}

impl FileOptions {
    fn format(&self) -> Format {
        Format::default()
            .with_header(self.has_header)
            .with_delimiter(self.delimiter)
            .with_quote(self.quote)
    }
}

/// A file loaded into record batches.
#[derive(Debug, Clone)]
pub(crate) struct LoadedFile {
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| {
        TermError::data_source_with_source(
            SOURCE_TYPE,
            format!("cannot open '{}'", path.display()),
            Box::new(e),
        )
    })
}

fn infer(file: &mut File, path: &Path, options: &FileOptions, max: usize) -> Result<Schema> {
    let (schema, _) = options
        .format()
        .infer_schema(&mut *file, Some(max))
        .map_err(|e| {
            TermError::data_source_with_source(
                SOURCE_TYPE,
                format!("cannot read header of '{}'", path.display()),
                Box::new(e),
            )
        })?;
    Ok(schema)
}

fn check_hint_length(path: &Path, schema: &Schema, hints: &[ColumnType]) -> Result<()> {
    if hints.len() != schema.fields().len() {
        return Err(TermError::data_source(
            SOURCE_TYPE,
            format!(
                "col_types has {} entries but '{}' has {} columns",
                hints.len(),
                path.display(),
                schema.fields().len()
            ),
        ));
    }
    Ok(())
}

/// Reads the column names of a file, leaving out skipped columns.
pub fn read_column_names(
    path: &Path,
    col_types: Option<&[ColumnType]>,
    options: &FileOptions,
) -> Result<Vec<String>> {
    let mut file = open(path)?;
    let schema = infer(&mut file, path, options, 1)?;
    if let Some(hints) = col_types {
        check_hint_length(path, &schema, hints)?;
    }
    Ok(schema
        .fields()
        .iter()
        .enumerate()
        .filter(|(i, _)| !col_types.is_some_and(|hints| hints[*i].is_skip()))
        .map(|(_, f)| f.name().clone())
        .collect())
}

/// Combines inferred types with the declared ones.
///
/// Returns the full read schema (every file column) and the projection of
/// kept columns.
fn apply_hints(inferred: &Schema, hints: Option<&[ColumnType]>) -> (Schema, Vec<usize>) {
    let mut fields = Vec::with_capacity(inferred.fields().len());
    let mut projection = Vec::new();
    for (i, field) in inferred.fields().iter().enumerate() {
        let hint = hints.map_or(ColumnType::Guess, |h| h[i]);
        let data_type = match hint {
            // skipped columns are read as text so they can never fail to parse
            ColumnType::Skip => DataType::Utf8,
            other => other
                .data_type()
                .unwrap_or_else(|| field.data_type().clone()),
        };
        if !hint.is_skip() {
            projection.push(i);
        }
        fields.push(Field::new(field.name(), data_type, true));
    }
    (Schema::new(fields), projection)
}

fn load_blocking(
    path: PathBuf,
    col_types: Option<Vec<ColumnType>>,
    options: FileOptions,
    batch_size: usize,
) -> Result<LoadedFile> {
    let mut file = open(&path)?;
    let inferred = infer(&mut file, &path, &options, options.schema_infer_max_records)?;
    if let Some(hints) = &col_types {
        check_hint_length(&path, &inferred, hints)?;
    }
    file.seek(SeekFrom::Start(0))?;

    let (read_schema, projection) = apply_hints(&inferred, col_types.as_deref());
    let schema: SchemaRef = Arc::new(read_schema.project(&projection)?);

    let reader = ReaderBuilder::new(Arc::new(read_schema))
        .with_header(options.has_header)
        .with_delimiter(options.delimiter)
        .with_quote(options.quote)
        .with_batch_size(batch_size)
        .with_projection(projection)
        .build(file)?;

    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            TermError::data_source_with_source(
                SOURCE_TYPE,
                format!(
                    "'{}' holds a value that does not parse as its declared column type: {e}",
                    path.display()
                ),
                Box::new(e),
            )
        })?;

    Ok(LoadedFile { schema, batches })
}

/// Loads a delimited file into memory on the blocking thread pool.
#[instrument(skip(col_types, options), fields(path = %path.display()))]
pub(crate) async fn load_file(
    path: &Path,
    col_types: Option<&[ColumnType]>,
    options: &FileOptions,
    batch_size: usize,
) -> Result<LoadedFile> {
    let owned_path = path.to_path_buf();
    let hints = col_types.map(<[ColumnType]>::to_vec);
    let opts = options.clone();

    let loaded = tokio::task::spawn_blocking(move || {
        load_blocking(owned_path, hints, opts, batch_size)
    })
    .await
    .map_err(|e| TermError::Internal(format!("file loading task failed: {e}")))??;

    debug!(
        columns = loaded.schema.fields().len(),
        rows = loaded.batches.iter().map(RecordBatch::num_rows).sum::<usize>(),
        "Loaded file"
    );
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_parse_col_types() {
        assert_eq!(
            parse_col_types("?-nlDTt").unwrap(),
            vec![
                ColumnType::Guess,
                ColumnType::Skip,
                ColumnType::Number,
                ColumnType::Logical,
                ColumnType::Date,
                ColumnType::DateTime,
                ColumnType::Time,
            ]
        );
        let err = parse_col_types("ciZ").unwrap_err();
        assert!(matches!(err, TermError::PlanBuild { .. }));
        assert!(err.to_string().contains("'Z'"));
    }

    #[test]
    fn test_read_column_names_skips() {
        let file = csv("a,b,c\n1,2,3\n");
        let names =
            read_column_names(file.path(), Some(&parse_col_types("i_i").unwrap()), &FileOptions::default())
                .unwrap();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_load_with_inference() {
        let file = csv("a,b,name\n5,3,x\n4,2,y\n");
        let loaded = load_file(file.path(), None, &FileOptions::default(), 8192)
            .await
            .unwrap();
        assert_eq!(loaded.schema.field(0).data_type(), &DataType::Int64);
        assert_eq!(loaded.schema.field(2).data_type(), &DataType::Utf8);
        assert_eq!(loaded.batches.iter().map(|b| b.num_rows()).sum::<usize>(), 2);
    }

    #[tokio::test]
    async fn test_declared_types_override_inference() {
        let file = csv("a,b,day\n5,3,2024-01-31\n4,2,2024-02-01\n");
        let types = parse_col_types("dcD").unwrap();
        let loaded = load_file(file.path(), Some(&types), &FileOptions::default(), 8192)
            .await
            .unwrap();
        assert_eq!(loaded.schema.field(0).data_type(), &DataType::Float64);
        assert_eq!(loaded.schema.field(1).data_type(), &DataType::Utf8);
        assert_eq!(loaded.schema.field(2).data_type(), &DataType::Date32);
    }

    #[tokio::test]
    async fn test_skipped_columns_are_dropped() {
        let file = csv("a,junk,b\n1,zz,2\n");
        let types = parse_col_types("i-i").unwrap();
        let loaded = load_file(file.path(), Some(&types), &FileOptions::default(), 8192)
            .await
            .unwrap();
        let names: Vec<_> = loaded.schema.fields().iter().map(|f| f.name().clone()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(loaded.batches[0].num_columns(), 2);
    }

    #[tokio::test]
    async fn test_hint_length_mismatch() {
        let file = csv("a,b\n1,2\n");
        let types = parse_col_types("iii").unwrap();
        let err = load_file(file.path(), Some(&types), &FileOptions::default(), 8192)
            .await
            .unwrap_err();
        assert!(matches!(err, TermError::DataSource { .. }));
        assert!(err.to_string().contains("3 entries"));
    }

    #[tokio::test]
    async fn test_unparseable_value_is_typed_error() {
        let file = csv("a\n1\nnot-a-number\n");
        let types = parse_col_types("i").unwrap();
        let err = load_file(file.path(), Some(&types), &FileOptions::default(), 8192)
            .await
            .unwrap_err();
        assert!(matches!(err, TermError::DataSource { .. }));
        assert!(err.to_string().contains("declared column type"));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = load_file(
            Path::new("/definitely/not/here.csv"),
            None,
            &FileOptions::default(),
            8192,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TermError::DataSource { .. }));
    }

    #[tokio::test]
    async fn test_custom_delimiter() {
        let file = csv("a;b\n1;2\n");
        let options = FileOptions {
            delimiter: b';',
            ..Default::default()
        };
        let loaded = load_file(file.path(), None, &options, 8192).await.unwrap();
        assert_eq!(loaded.schema.fields().len(), 2);
    }
}
