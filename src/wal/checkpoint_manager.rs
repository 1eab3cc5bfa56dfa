use crate::{
    wal::{LogPointer, WalLogRecord},
    Error, Result, DB,
};

use std::{
    fs::{File, OpenOptions},
    io::prelude::*,
    path::{Path, PathBuf},
    time::SystemTime,
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc::crc32;

use serde::{Deserialize, Serialize};

/// Persistent state of the database as a whole, stored in the master
/// record (§6 "checkpoint daemon") so a restart can tell a clean shutdown
/// from a crash without reading the WAL first.
#[derive(Copy, Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum DBState {
    Uninitialized,
    Running,
    InCrashRecovery,
    Shutdowned,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct MasterRecord {
    pub last_checkpoint_pos: LogPointer,
    pub checkpoint_time: SystemTime,
    pub db_state: DBState,
}

impl Default for MasterRecord {
    fn default() -> Self {
        Self {
            last_checkpoint_pos: 0,
            checkpoint_time: SystemTime::now(),
            db_state: DBState::Uninitialized,
        }
    }
}

struct MasterRecordFile {
    file_path: PathBuf,
}

impl MasterRecordFile {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
        }
    }

    pub fn read_master_record(&self) -> Result<Option<MasterRecord>> {
        if !self.file_path.exists() {
            return Ok(None);
        }

        if !self.file_path.is_file() {
            return Err(Error::WrongObjectType(format!(
                "'{}' exists but is not a regular file",
                self.file_path.as_path().display()
            )));
        }

        let mut file = File::open(&self.file_path)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;

        if buffer.len() < 4 {
            return Err(Error::DataCorrupted(
                "master record is corrupted".to_owned(),
            ));
        }

        let crc_buf = buffer.split_off(buffer.len() - 4);
        let crc_file = (&crc_buf[..]).read_u32::<LittleEndian>().unwrap();
        let crc = crc32::checksum_ieee(&buffer);

        if crc != crc_file {
            return Err(Error::DataCorrupted(
                "master record is corrupted (checksum does not match)".to_owned(),
            ));
        }

        let record = match bincode::deserialize::<MasterRecord>(&buffer) {
            Ok(record) => record,
            _ => {
                return Err(Error::DataCorrupted(
                    "cannot deserialize the master record".to_owned(),
                ));
            }
        };

        Ok(Some(record))
    }

    pub fn write_master_record(&self, record: &MasterRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .read(false)
            .open(&self.file_path)?;
        let mut buffer = bincode::serialize(record).unwrap();
        let crc = crc32::checksum_ieee(&buffer);
        buffer.write_u32::<LittleEndian>(crc).unwrap();

        file.write_all(&buffer)?;

        Ok(())
    }
}

pub struct CheckpointManager {
    master_record_file: MasterRecordFile,
    master_record: MasterRecord,
}

impl CheckpointManager {
    pub fn open<P: AsRef<Path>>(master_record_path: P) -> Result<Self> {
        let master_record_file = MasterRecordFile::new(master_record_path);
        let master_record = match master_record_file.read_master_record()? {
            Some(record) => record,
            _ => {
                let record = MasterRecord::default();
                master_record_file.write_master_record(&record)?;
                record
            }
        };
        Ok(Self {
            master_record_file,
            master_record,
        })
    }

    pub fn read_master_record(&self) -> Result<&MasterRecord> {
        Ok(&self.master_record)
    }

    pub fn set_db_state(&mut self, db_state: DBState) -> Result<()> {
        self.master_record.db_state = db_state;
        self.master_record_file.write_master_record(&self.master_record)
    }

    pub fn create_checkpoint(&mut self, db: &DB) -> Result<()> {
        let wal = db.get_wal();
        let redo_pos = wal.current_lsn();

        db.get_buffer_manager().sync_pages(db)?;

        let checkpoint_log = WalLogRecord::create_checkpoint_log(redo_pos);
        let (_, checkpoint_lsn) = wal.append(0, checkpoint_log)?;
        wal.flush(Some(checkpoint_lsn))?;

        self.master_record.checkpoint_time = SystemTime::now();
        self.master_record.last_checkpoint_pos = checkpoint_lsn;
        self.master_record_file
            .write_master_record(&self.master_record)?;

        log::debug!("checkpoint written at lsn {}", checkpoint_lsn);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{catalog::Schema, concurrency::IsolationLevel, test_util::get_temp_db};

    #[test]
    fn can_create_checkpoint() {
        let (db, db_dir) = get_temp_db();
        let txn = db.start_transaction(IsolationLevel::ReadCommitted).unwrap();
        let heap = db.create_table(0, 0, Schema::new()).unwrap();

        let data: &[u8] = &[1u8; 100];
        heap.insert_tuple(&db, &txn, data).unwrap();

        db.commit_transaction(txn).unwrap();

        assert!(db.create_checkpoint().is_ok());

        db_dir.close().unwrap();
    }
}
