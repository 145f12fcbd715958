//! Diagnostic enumeration of a bundle's header tables.
//!
//! Tooling needs to see what a bundle holds -- imports, exports, packet
//! offsets, compression ratios -- without paying to decompress anything.
//! [`Bundle::dump`] walks only the already-parsed tables.

use serde::Serialize;

use crate::format::Compression;
use crate::reader::Bundle;

/// One import line in a dump.
#[derive(Clone, Debug, Serialize)]
pub struct ImportDump {
    pub locator: String,
    pub used_exports: usize,
    pub export_count: u32,
}

/// One export line in a dump.
#[derive(Clone, Debug, Serialize)]
pub struct ExportDump {
    pub index: u32,
    pub hash: String,
    pub length: u64,
    pub ref_count: usize,
}

/// One packet line in a dump, positioned within the bundle payload.
#[derive(Clone, Debug, Serialize)]
pub struct PacketDump {
    pub index: usize,
    /// Byte offset of the packet within the bundle payload.
    pub offset: u64,
    pub encoded_len: u64,
    pub decoded_len: u64,
    pub compression: Compression,
    /// `encoded / decoded`; 1.0 means incompressible.
    pub ratio: f64,
}

/// Structured view of a bundle's header tables.
#[derive(Clone, Debug, Serialize)]
pub struct BundleDump {
    pub locator: String,
    pub header_len: usize,
    pub imports: Vec<ImportDump>,
    pub exports: Vec<ExportDump>,
    pub packets: Vec<PacketDump>,
    pub total_encoded: u64,
    pub total_decoded: u64,
    pub overall_ratio: f64,
}

impl Bundle {
    /// Enumerate the header tables with offsets and compression ratios.
    ///
    /// Never materializes payload: no packet is decompressed.
    pub fn dump(&self) -> BundleDump {
        let imports = self
            .imports()
            .iter()
            .map(|import| ImportDump {
                locator: import.locator.to_string(),
                used_exports: import.used_exports.len(),
                export_count: import.export_count,
            })
            .collect();

        let exports = self
            .exports()
            .iter()
            .enumerate()
            .map(|(index, export)| ExportDump {
                index: index as u32,
                hash: export.hash.to_hex(),
                length: export.length,
                ref_count: export.refs.len(),
            })
            .collect();

        let mut offset = self.header_len() as u64;
        let mut total_encoded = 0u64;
        let mut total_decoded = 0u64;
        let packets = self
            .packets()
            .iter()
            .enumerate()
            .map(|(index, packet)| {
                let dump = PacketDump {
                    index,
                    offset,
                    encoded_len: packet.encoded_len,
                    decoded_len: packet.decoded_len,
                    compression: packet.compression,
                    ratio: ratio(packet.encoded_len, packet.decoded_len),
                };
                offset += packet.encoded_len;
                total_encoded += packet.encoded_len;
                total_decoded += packet.decoded_len;
                dump
            })
            .collect();

        BundleDump {
            locator: self.locator().to_string(),
            header_len: self.header_len(),
            imports,
            exports,
            packets,
            total_encoded,
            total_decoded,
            overall_ratio: ratio(total_encoded, total_decoded),
        }
    }
}

fn ratio(encoded: u64, decoded: u64) -> f64 {
    if decoded == 0 {
        1.0
    } else {
        encoded as f64 / decoded as f64
    }
}

impl std::fmt::Display for BundleDump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "bundle {}", self.locator)?;
        writeln!(f, "  header: {} bytes", self.header_len)?;

        writeln!(f, "  imports ({}):", self.imports.len())?;
        for import in &self.imports {
            writeln!(
                f,
                "    {} uses {}/{} exports",
                import.locator, import.used_exports, import.export_count
            )?;
        }

        writeln!(f, "  exports ({}):", self.exports.len())?;
        for export in &self.exports {
            writeln!(
                f,
                "    [{}] {} {} bytes, {} refs",
                export.index,
                &export.hash[..12],
                export.length,
                export.ref_count
            )?;
        }

        writeln!(f, "  packets ({}):", self.packets.len())?;
        for packet in &self.packets {
            writeln!(
                f,
                "    [{}] offset {} {} -> {} bytes ({}, ratio {:.3})",
                packet.index,
                packet.offset,
                packet.decoded_len,
                packet.encoded_len,
                packet.compression,
                packet.ratio
            )?;
        }

        write!(
            f,
            "  total: {} -> {} bytes (ratio {:.3})",
            self.total_decoded, self.total_encoded, self.overall_ratio
        )
    }
}
