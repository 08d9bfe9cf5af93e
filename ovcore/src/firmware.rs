// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Register-map parsing and firmware-package unpacking (C9).

use crate::error::{ConfigError, Error, Result};
use crate::mmio::{RegisterDescriptor, RegisterTable};
use std::io::{Read, Seek};

const DEFAULT_BITSTREAM_NAME: &str = "ov3.bit";
const DEFAULT_REGISTER_MAP_NAME: &str = "map.txt";

/// Parses a register-map text file: one `NAME = HEX[:HEX]` directive per
/// non-empty line, `#` starting a comment that runs to end of line.
///
/// The optional `:HEX` gives an inclusive upper address bound; size is
/// `(upper - base) + 1` and must be at least 2. Duplicate names are a
/// parse error.
pub fn parse_register_map(text: &str) -> Result<RegisterTable> {
    let mut table = RegisterTable::new();

    for raw_line in text.lines() {
        let line = match raw_line.find('#') {
            Some(idx) => &raw_line[..idx],
            None => raw_line,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (name, rest) = line.split_once('=').ok_or_else(|| {
            Error::Config(ConfigError::BadRegisterMap(format!(
                "could not parse line: {}",
                raw_line
            )))
        })?;
        let name = name.trim();
        let rest = rest.trim();

        let (base_str, upper_str) = match rest.split_once(':') {
            Some((b, u)) => (b.trim(), Some(u.trim())),
            None => (rest, None),
        };

        let base = u16::from_str_radix(base_str, 16).map_err(|_| {
            Error::Config(ConfigError::BadRegisterMap(format!(
                "not a hex address: {}",
                base_str
            )))
        })?;

        let size = match upper_str {
            None => 1,
            Some(upper_str) => {
                let upper = u16::from_str_radix(upper_str, 16).map_err(|_| {
                    Error::Config(ConfigError::BadRegisterMap(format!(
                        "not a hex address: {}",
                        upper_str
                    )))
                })?;
                let size = (upper as i32 - base as i32) + 1;
                if size < 2 {
                    return Err(Error::Config(ConfigError::BadRegisterMap(format!(
                        "register range {}:{} is not at least 2 bytes wide",
                        base_str, upper_str
                    ))));
                }
                size as u8
            }
        };

        table.insert(
            name,
            RegisterDescriptor {
                base_address: base,
                size,
            },
        )?;
    }

    Ok(table)
}

/// A firmware archive bundling a bitstream blob and a register-map text
/// file. Member names are accepted as constructor parameters, defaulting
/// to the historical pair used by the reference firmware, per §4.7.
pub struct FirmwarePackage<R> {
    archive: zip::ZipArchive<R>,
    bitstream_name: String,
    register_map_name: String,
}

impl<R: Read + Seek> FirmwarePackage<R> {
    /// Opens a firmware package using the historical member names
    /// (`ov3.bit`, `map.txt`).
    pub fn open(reader: R) -> Result<Self> {
        Self::open_with_names(reader, DEFAULT_BITSTREAM_NAME, DEFAULT_REGISTER_MAP_NAME)
    }

    /// Opens a firmware package with explicit archive member names.
    pub fn open_with_names(
        reader: R,
        bitstream_name: &str,
        register_map_name: &str,
    ) -> Result<Self> {
        let archive = zip::ZipArchive::new(reader)
            .map_err(|e| Error::Config(ConfigError::BadBitstream(e.to_string())))?;
        Ok(Self {
            archive,
            bitstream_name: bitstream_name.to_string(),
            register_map_name: register_map_name.to_string(),
        })
    }

    /// Returns the raw bitstream bytes.
    pub fn get_bitstream(&mut self) -> Result<Vec<u8>> {
        let mut file = self
            .archive
            .by_name(&self.bitstream_name)
            .map_err(|e| Error::Config(ConfigError::BadBitstream(e.to_string())))?;
        let mut buf = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut buf)
            .map_err(|e| Error::Config(ConfigError::BadBitstream(e.to_string())))?;
        Ok(buf)
    }

    /// Parses and returns the bundled register map.
    pub fn get_register_map(&mut self) -> Result<RegisterTable> {
        let mut file = self
            .archive
            .by_name(&self.register_map_name)
            .map_err(|e| Error::Config(ConfigError::BadRegisterMap(e.to_string())))?;
        let mut text = String::new();
        file.read_to_string(&mut text)
            .map_err(|e| Error::Config(ConfigError::BadRegisterMap(e.to_string())))?;
        parse_register_map(&text)
    }
}
