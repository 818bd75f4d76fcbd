//! Arrow IPC adapters: a forward-only stream source and a rewindable
//! file source.
//!
//! The stream variant cannot restart once read past the cursor's
//! lookahead window; the file variant repositions through the IPC
//! footer's batch index. Neither carries column statistics, so filter
//! pushdown over these sources degrades to full scans.

use std::io::{Read, Seek};

use arrow::ipc::reader::{FileReader, StreamReader};
use arrow_array::RecordBatch;
use arrow_schema::SchemaRef;

use crate::error::Result;
use crate::source::BatchStream;

/// Forward-only source over an Arrow IPC stream.
pub struct IpcStreamSource<R: Read> {
    reader: StreamReader<R>,
}

impl<R: Read> IpcStreamSource<R> {
    pub fn try_new(reader: R) -> Result<Self> {
        Ok(IpcStreamSource {
            reader: StreamReader::try_new(reader, None)?,
        })
    }
}

impl<R: Read> BatchStream for IpcStreamSource<R> {
    fn schema(&self) -> SchemaRef {
        self.reader.schema()
    }

    fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        Ok(self.reader.next().transpose()?)
    }

    // default rewind(): unsupported
}

/// Rewindable source over an Arrow IPC file.
pub struct IpcFileSource<R: Read + Seek> {
    reader: FileReader<R>,
}

impl<R: Read + Seek> IpcFileSource<R> {
    pub fn try_new(reader: R) -> Result<Self> {
        Ok(IpcFileSource {
            reader: FileReader::try_new(reader, None)?,
        })
    }

    /// Number of record batches in the file footer.
    pub fn batch_count(&self) -> usize {
        self.reader.num_batches()
    }
}

impl<R: Read + Seek> BatchStream for IpcFileSource<R> {
    fn schema(&self) -> SchemaRef {
        self.reader.schema()
    }

    fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        Ok(self.reader.next().transpose()?)
    }

    fn rewind(&mut self) -> Result<bool> {
        self.reader.set_index(0)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::ipc::writer::{FileWriter, StreamWriter};
    use arrow_array::Int32Array;
    use arrow_schema::{DataType, Field, Schema};
    use std::io::Cursor;
    use std::sync::Arc;

    fn sample_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, false)]));
        RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(vec![1, 2, 3]))]).unwrap()
    }

    #[test]
    fn test_stream_source() {
        let batch = sample_batch();
        let mut buf = Vec::new();
        {
            let mut writer = StreamWriter::try_new(&mut buf, &batch.schema()).unwrap();
            writer.write(&batch).unwrap();
            writer.write(&batch).unwrap();
            writer.finish().unwrap();
        }
        let mut source = IpcStreamSource::try_new(Cursor::new(buf)).unwrap();
        assert_eq!(source.schema().fields().len(), 1);
        assert_eq!(source.next_batch().unwrap().unwrap().num_rows(), 3);
        assert_eq!(source.next_batch().unwrap().unwrap().num_rows(), 3);
        assert!(source.next_batch().unwrap().is_none());
        assert!(!source.rewind().unwrap());
    }

    #[test]
    fn test_file_source_rewinds() {
        let batch = sample_batch();
        let mut buf = Vec::new();
        {
            let mut writer = FileWriter::try_new(&mut buf, &batch.schema()).unwrap();
            writer.write(&batch).unwrap();
            writer.finish().unwrap();
        }
        let mut source = IpcFileSource::try_new(Cursor::new(buf)).unwrap();
        assert_eq!(source.batch_count(), 1);
        assert!(source.next_batch().unwrap().is_some());
        assert!(source.next_batch().unwrap().is_none());
        assert!(source.rewind().unwrap());
        assert!(source.next_batch().unwrap().is_some());
    }
}
