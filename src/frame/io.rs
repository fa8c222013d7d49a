use std::io::Cursor;
use std::sync::Arc;

use arrow::compute::{cast, concat_batches};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use arrow_csv::reader::Format;
use arrow_csv::{ReaderBuilder, Writer};
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::error::{DatasetError, DatasetResult};

use super::Frame;

// How many records to look at when inferring CSV column types
const INFER_MAX_RECORDS: usize = 10_000;

/// Parse a CSV file with a header row, inferring column types
pub fn read_csv(data: &[u8]) -> DatasetResult<Frame> {
    if data.iter().all(u8::is_ascii_whitespace) {
        return Err(DatasetError::invalid("The CSV file is empty"));
    }

    let format = Format::default().with_header(true);
    let (schema, _) = format
        .infer_schema(Cursor::new(data), Some(INFER_MAX_RECORDS))
        .map_err(|e| DatasetError::invalid(format!("Can't parse CSV: {e}")))?;
    // Dates and times stay the text they were written as
    let fields: Vec<Field> = schema
        .fields()
        .iter()
        .map(|field| match field.data_type() {
            DataType::Date32
            | DataType::Date64
            | DataType::Timestamp(_, _)
            | DataType::Time32(_)
            | DataType::Time64(_)
            | DataType::Duration(_)
            | DataType::Interval(_) => field.as_ref().clone().with_data_type(DataType::Utf8),
            _ => field.as_ref().clone(),
        })
        .collect();
    let schema = Arc::new(Schema::new(fields));

    let reader = ReaderBuilder::new(schema.clone())
        .with_header(true)
        .build(Cursor::new(data))
        .map_err(|e| DatasetError::invalid(format!("Can't parse CSV: {e}")))?;
    let batches = reader
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| DatasetError::invalid(format!("Can't parse CSV: {e}")))?;
    let batch = concat_batches(&schema, &batches)?;

    // Columns with no values at all are inferred as Null; keep them as text
    let columns = batch
        .schema()
        .fields()
        .iter()
        .zip(batch.columns())
        .map(|(field, array)| {
            let array = match array.data_type() {
                DataType::Null => cast(array, &DataType::Utf8)?,
                _ => array.clone(),
            };
            Ok((field.name().clone(), array))
        })
        .collect::<DatasetResult<Vec<_>>>()?;

    // Re-validates the column names
    Frame::try_new(columns)
}

pub fn write_csv(frame: &Frame) -> DatasetResult<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut writer = Writer::new(&mut buf);
        writer.write(frame.batch())?;
    }
    Ok(buf)
}

/// Serialise a frame to Snappy-compressed Parquet. The Arrow schema travels in the file
/// metadata, so column order and types survive a round trip.
pub fn encode_parquet(frame: &Frame) -> DatasetResult<Bytes> {
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, frame.batch().schema(), Some(props))?;
    writer.write(frame.batch())?;
    writer.close()?;
    Ok(Bytes::from(buf))
}

pub fn decode_parquet(data: Bytes) -> DatasetResult<Frame> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(data)?;
    let schema = builder.schema().clone();
    let batches = builder.build()?.collect::<Result<Vec<RecordBatch>, _>>()?;
    Ok(Frame::new(concat_batches(&schema, &batches)?))
}

#[cfg(test)]
mod tests {
    use arrow::datatypes::DataType;

    use super::{decode_parquet, encode_parquet, read_csv, write_csv};
    use crate::frame::values::to_string_values;
    use crate::frame::{classify, ColumnClass};

    const CSV: &str = "id,name,score,active\n1,a,1.5,true\n2,,2.5,false\n3,c,,true\n";

    #[test]
    fn test_read_csv_infers_types_and_nulls() {
        let frame = read_csv(CSV.as_bytes()).unwrap();
        assert_eq!(frame.column_names(), vec!["id", "name", "score", "active"]);
        assert_eq!(frame.data_type("id").unwrap(), DataType::Int64);
        assert_eq!(frame.data_type("name").unwrap(), DataType::Utf8);
        assert_eq!(frame.data_type("score").unwrap(), DataType::Float64);
        assert_eq!(frame.data_type("active").unwrap(), DataType::Boolean);
        assert_eq!(frame.null_count("name").unwrap(), 1);
        assert_eq!(frame.null_count("score").unwrap(), 1);
    }

    #[test]
    fn test_read_csv_rejects_duplicate_headers() {
        assert!(read_csv("a,a\n1,2\n".as_bytes()).is_err());
        assert!(read_csv(" \n".as_bytes()).is_err());
    }

    #[test]
    fn test_read_csv_empty_column_is_text() {
        let frame = read_csv("a,b\n1,\n2,\n".as_bytes()).unwrap();
        assert_eq!(frame.data_type("b").unwrap(), DataType::Utf8);
        assert_eq!(frame.null_count("b").unwrap(), 2);
    }

    #[test]
    fn test_read_csv_dates_are_text() {
        let frame = read_csv(
            "day,seen_at,value\n2024-01-01,2024-01-01T10:00:00,1\n2024-01-02,2024-01-02T11:30:00,2\n"
                .as_bytes(),
        )
        .unwrap();
        for column in ["day", "seen_at"] {
            assert_eq!(frame.data_type(column).unwrap(), DataType::Utf8);
            assert_eq!(frame.class_of(column).unwrap(), ColumnClass::Categorical);
        }
        assert_eq!(
            to_string_values(frame.column("day").unwrap()).unwrap(),
            vec![Some("2024-01-01".to_string()), Some("2024-01-02".to_string())]
        );
        assert_eq!(frame.class_of("value").unwrap(), ColumnClass::Numerical);
    }

    #[test]
    fn test_parquet_preserves_schema_and_classification() {
        let frame = read_csv(CSV.as_bytes()).unwrap();
        let decoded = decode_parquet(encode_parquet(&frame).unwrap()).unwrap();

        assert_eq!(decoded.fields(), frame.fields());
        assert_eq!(decoded.batch().columns(), frame.batch().columns());
        for (name, data_type) in decoded.fields() {
            assert_eq!(
                classify(&data_type),
                classify(&frame.data_type(&name).unwrap())
            );
        }
        assert_eq!(decoded.class_of("active").unwrap(), ColumnClass::Categorical);
    }

    #[test]
    fn test_empty_frame_round_trip() {
        let frame = read_csv(CSV.as_bytes()).unwrap().slice(0, 0);
        let decoded = decode_parquet(encode_parquet(&frame).unwrap()).unwrap();
        assert_eq!(decoded.num_rows(), 0);
        assert_eq!(decoded.column_names(), frame.column_names());
    }

    #[test]
    fn test_write_csv_has_header() {
        let frame = read_csv(CSV.as_bytes()).unwrap();
        let out = String::from_utf8(write_csv(&frame).unwrap()).unwrap();
        assert!(out.starts_with("id,name,score,active\n"));
        assert_eq!(out.lines().count(), 4);
    }
}
