//! Chain trace export.
//!
//! Traces are `chain x sample x dim` arrays, as returned by
//! [`McmcController::run_multi`](crate::controller::McmcController::run_multi).
//! Single chains or SMC populations can be written after
//! `insert_axis(Axis(0))`. Every format uses the columns `chain`, `sample`,
//! `dim_0`, `dim_1`, ...
//!
//! Each writer sits behind the cargo feature of the same name.

#[cfg(any(feature = "csv", feature = "arrow"))]
use std::error::Error;
#[cfg(any(feature = "csv", feature = "arrow"))]
use std::fs::File;

#[cfg(any(feature = "csv", feature = "arrow"))]
use ndarray::ArrayView3;

#[cfg(feature = "csv")]
use csv::Writer;

#[cfg(feature = "parquet")]
use parquet::{arrow::ArrowWriter, file::properties::WriterProperties};

#[cfg(feature = "arrow")]
use arrow::{
    array::{ArrayRef, Float64Builder, UInt32Builder},
    datatypes::{DataType, Field, Schema, SchemaRef},
    ipc::writer::FileWriter,
    record_batch::RecordBatch,
};
#[cfg(feature = "arrow")]
use std::sync::Arc;

#[cfg(feature = "csv")]
/// Saves a trace as a CSV file with a header row.
///
/// # Arguments
///
/// * `data` - Samples organized as `data[[chain, sample, dim]]`.
/// * `filename` - The file path where the CSV data will be written.
///
/// # Examples
///
/// ```rust
/// # use asktell_mcmc::io::save_csv;
/// use ndarray::Array3;
///
/// let data = Array3::<f64>::zeros((2, 3, 1));
/// save_csv(data.view(), "/tmp/trace.csv")?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn save_csv(data: ArrayView3<f64>, filename: &str) -> Result<(), Box<dyn Error>> {
    let mut wtr = Writer::from_writer(File::create(filename)?);
    let (_, _, n_dims) = data.dim();

    let mut header: Vec<String> = vec!["chain".to_string(), "sample".to_string()];
    header.extend((0..n_dims).map(|i| format!("dim_{}", i)));
    wtr.write_record(&header)?;

    for (chain_idx, chain) in data.outer_iter().enumerate() {
        for (sample_idx, sample) in chain.outer_iter().enumerate() {
            let mut row = vec![chain_idx.to_string(), sample_idx.to_string()];
            row.extend(sample.iter().map(|v| v.to_string()));
            wtr.write_record(&row)?;
        }
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(feature = "arrow")]
fn trace_schema(n_dims: usize) -> SchemaRef {
    let mut fields = vec![
        Field::new("chain", DataType::UInt32, false),
        Field::new("sample", DataType::UInt32, false),
    ];
    fields.extend(
        (0..n_dims).map(|dim_idx| Field::new(format!("dim_{}", dim_idx), DataType::Float64, false)),
    );
    Arc::new(Schema::new(fields))
}

#[cfg(feature = "arrow")]
/// Flattens a trace into a single record batch, one row per sample.
fn trace_batch(data: ArrayView3<f64>) -> Result<RecordBatch, Box<dyn Error>> {
    let (_, _, n_dims) = data.dim();
    let schema = trace_schema(n_dims);

    let mut chain_builder = UInt32Builder::new();
    let mut sample_builder = UInt32Builder::new();
    let mut dim_builders: Vec<Float64Builder> =
        (0..n_dims).map(|_| Float64Builder::new()).collect();

    for (chain_idx, chain) in data.outer_iter().enumerate() {
        for (sample_idx, sample) in chain.outer_iter().enumerate() {
            chain_builder.append_value(u32::try_from(chain_idx)?);
            sample_builder.append_value(u32::try_from(sample_idx)?);
            for (builder, val) in dim_builders.iter_mut().zip(sample.iter()) {
                builder.append_value(*val);
            }
        }
    }

    let mut arrays = vec![
        Arc::new(chain_builder.finish()) as ArrayRef,
        Arc::new(sample_builder.finish()) as ArrayRef,
    ];
    arrays.extend(
        dim_builders
            .into_iter()
            .map(|mut builder| Arc::new(builder.finish()) as ArrayRef),
    );
    Ok(RecordBatch::try_new(schema, arrays)?)
}

#[cfg(feature = "arrow")]
/// Saves a trace as an Apache Arrow IPC file.
///
/// # Arguments
///
/// * `data` - Samples organized as `data[[chain, sample, dim]]`.
/// * `filename` - The path to the Arrow (IPC) file to create.
pub fn save_arrow(data: ArrayView3<f64>, filename: &str) -> Result<(), Box<dyn Error>> {
    let record_batch = trace_batch(data)?;
    let file = File::create(filename)?;
    let mut writer = FileWriter::try_new(file, &record_batch.schema())?;
    writer.write(&record_batch)?;
    writer.finish()?;
    Ok(())
}

#[cfg(feature = "parquet")]
/// Saves a trace as a Parquet file.
///
/// # Example
///
/// ```rust
/// # use asktell_mcmc::io::save_parquet;
/// use ndarray::Array3;
///
/// let data = Array3::from_elem((1, 1, 1), 42.0);
/// save_parquet(data.view(), "/tmp/trace.parquet")?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn save_parquet(data: ArrayView3<f64>, filename: &str) -> Result<(), Box<dyn Error>> {
    let record_batch = trace_batch(data)?;
    let file = File::create(filename)?;
    let props = WriterProperties::builder().build();
    let mut writer = ArrowWriter::try_new(file, record_batch.schema(), Some(props))?;
    writer.write(&record_batch)?;
    // Close the writer to ensure metadata is written
    writer.close()?;
    Ok(())
}


#[cfg(all(test, feature = "arrow"))]
mod arrow_tests {
    use super::*;
    use arrow::{
        array::{Float64Array, UInt32Array},
        ipc::reader::FileReader,
    };
    use ndarray::{arr3, Array3};
    use tempfile::NamedTempFile;

    #[test]
    fn test_save_arrow_empty_data() {
        let data = Array3::<f64>::zeros((0, 0, 0));
        let file = NamedTempFile::new().expect("Could not create temp file");
        let filename = file.path().to_str().unwrap();
        save_arrow(data.view(), filename).unwrap();

        let mut reader = FileReader::try_new(File::open(filename).unwrap(), None).unwrap();
        let batch = reader.next().unwrap().unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.num_columns(), 2);
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_save_arrow_multi_chain() {
        let data = arr3(&[[[1.0], [2.0], [3.0]], [[10.0], [20.0], [30.0]]]);
        let file = NamedTempFile::new().expect("Could not create temp file");
        let filename = file.path().to_str().unwrap();
        save_arrow(data.view(), filename).unwrap();

        let mut reader = FileReader::try_new(File::open(filename).unwrap(), None).unwrap();
        let batch = reader.next().unwrap().unwrap();
        assert_eq!(batch.num_rows(), 6);
        let chains = batch
            .column(0)
            .as_any()
            .downcast_ref::<UInt32Array>()
            .unwrap();
        let samples = batch
            .column(1)
            .as_any()
            .downcast_ref::<UInt32Array>()
            .unwrap();
        let dim_0 = batch
            .column(2)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(chains.values().to_vec(), vec![0, 0, 0, 1, 1, 1]);
        assert_eq!(samples.values().to_vec(), vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(
            dim_0.values().to_vec(),
            vec![1.0, 2.0, 3.0, 10.0, 20.0, 30.0]
        );
    }
}
