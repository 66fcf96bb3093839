use clap::Parser;
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
};
use thiserror::Error;
use wia_riider::{version_to_string, WiaError, WiaReader, SECTOR_DATA_SIZE, SECTOR_SIZE};

#[derive(Debug, Parser)]
#[clap(about = "Utility to inspect and unpack WIA disc images")]
enum Commands {
    #[clap(about = "show headers and sections of the image")]
    Info { filename: PathBuf },
    #[clap(about = "decode the full disc image back into an iso")]
    Extract {
        filename: PathBuf,
        destination: PathBuf,
    },
    #[clap(about = "dump the decrypted data of a wii partition")]
    ExtractPartition {
        filename: PathBuf,
        destination: PathBuf,
        #[clap(long, default_value = "0")]
        index: usize,
    },
}

#[derive(Error, Debug)]
enum MyError {
    #[error("IO Error: {io_error}")]
    IOError {
        #[from]
        io_error: std::io::Error,
    },
    #[error("Read error: {error}")]
    WiaError {
        #[from]
        error: WiaError,
    },
    #[error("partition {0} not present!")]
    PartitionNotFound(usize),
}

fn main() -> Result<(), MyError> {
    let args = Commands::parse();
    match args {
        Commands::Info { filename } => {
            let f = File::open(filename)?;
            let reader = WiaReader::open(f)?;
            println!("title:       {}", reader.game_title());
            println!("disc type:   {:?}", reader.disc_type());
            println!("version:     {}", version_to_string(reader.version()));
            println!(
                "compression: {:?} (level {})",
                reader.compression(),
                reader.compression_level()
            );
            println!("chunk size:  {:#x}", reader.block_size());
            println!("iso size:    {:#x}", reader.data_size());
            println!("wia size:    {:#x}", reader.raw_size());
            for (index, partition) in reader.partitions().iter().enumerate() {
                let data = &partition.data_entries[0];
                println!(
                    "partition {index}: data at {:#x}, {:#x} sectors",
                    data.start_offset(),
                    data.number_of_sectors
                );
            }
        }
        Commands::Extract {
            filename,
            destination,
        } => {
            let f = File::open(filename)?;
            let mut reader = WiaReader::open(f)?;
            let mut out = BufWriter::new(File::create(destination)?);
            let total = reader.data_size();
            let mut buf = vec![0u8; reader.block_size() as usize];
            let mut offset = 0;
            while offset < total {
                let count = buf.len().min((total - offset) as usize);
                reader.read(offset, &mut buf[..count])?;
                out.write_all(&buf[..count])?;
                offset += count as u64;
            }
            out.flush()?;
        }
        Commands::ExtractPartition {
            filename,
            destination,
            index,
        } => {
            let f = File::open(filename)?;
            let mut reader = WiaReader::open(f)?;
            let data = reader
                .partitions()
                .get(index)
                .map(|partition| partition.data_entries[0])
                .filter(|data| data.number_of_sectors != 0)
                .ok_or(MyError::PartitionNotFound(index))?;
            let partition_data_offset = data.start_offset();
            let total = data.number_of_sectors as u64 * SECTOR_DATA_SIZE;
            let chunk = (reader.block_size() as u64 / SECTOR_SIZE * SECTOR_DATA_SIZE) as usize;
            let mut out = BufWriter::new(File::create(destination)?);
            let mut buf = vec![0u8; chunk];
            let mut offset = 0;
            while offset < total {
                let count = buf.len().min((total - offset) as usize);
                reader.read_wii_decrypted(offset, &mut buf[..count], partition_data_offset)?;
                out.write_all(&buf[..count])?;
                offset += count as u64;
            }
            out.flush()?;
        }
    }
    Ok(())
}
