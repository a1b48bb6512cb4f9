use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use anyhow::Result;

/// Reader over a file or stdin (`-`).
pub struct InputReader {
    reader: Box<dyn Read>,
    is_pipe: bool,
}

impl InputReader {
    pub fn new<P: AsRef<Path>>(input_path: P) -> Result<Self> {
        let path_str = input_path.as_ref().to_string_lossy();
        let is_pipe = path_str == "-";

        let reader: Box<dyn Read> = if is_pipe {
            Box::new(io::stdin().lock())
        } else {
            let file = File::open(input_path)?;
            Box::new(BufReader::new(file))
        };

        Ok(Self { reader, is_pipe })
    }

    pub fn is_pipe(&self) -> bool {
        self.is_pipe
    }

    pub fn read_to_string(&mut self) -> Result<String> {
        let mut text = String::new();
        self.reader.read_to_string(&mut text)?;
        Ok(text)
    }

    /// Process data in chunks using a callback function
    /// The callback receives each chunk and should return Ok(true) to continue or Ok(false) to stop
    pub fn process_chunks<F>(&mut self, chunk_size: usize, mut callback: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<bool>,
    {
        let mut buffer = vec![0u8; chunk_size];

        loop {
            let bytes_read = self.reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }

            if !callback(&buffer[..bytes_read])? {
                break;
            }
        }

        Ok(())
    }

    /// Reads raw 32-bit float little-endian samples. A trailing partial
    /// sample is dropped.
    pub fn read_f32le(&mut self) -> Result<Vec<f32>> {
        let mut samples = Vec::new();
        let mut carry = Vec::with_capacity(4);
        self.process_chunks(64 * 1024, |chunk| {
            for &byte in chunk {
                carry.push(byte);
                if carry.len() == 4 {
                    samples.push(f32::from_le_bytes([carry[0], carry[1], carry[2], carry[3]]));
                    carry.clear();
                }
            }
            Ok(true)
        })?;
        if !carry.is_empty() {
            log::warn!("Ignoring {} trailing byte(s) of sample data", carry.len());
        }
        Ok(samples)
    }
}
