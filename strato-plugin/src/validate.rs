//! Artifact validation, run before anything touches the dynamic linker.
//!
//! Checks run in order and short-circuit on the first failure; the cheap
//! file checks come first, the ABI checks last. Rejecting a toolchain
//! mismatch here is much cheaper than discovering it after the image is
//! mapped into the live process.

use crate::middleware::{
    major_minor, ABI_MARKER_PREFIX, DECLARATION_SYMBOL_NAME, RUSTC_VERSION,
};
use std::path::Path;
use strato_core::record::ToolchainInfo;
use strato_core::ValidationError;

/// Smallest plausible dynamic library, in bytes. Anything under this is
/// rejected outright by the security floor.
const MIN_ARTIFACT_SIZE: u64 = 256;

/// Outcome of a successful validation.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub file_size: u64,
    pub toolchain: ToolchainInfo,
    pub warnings: Vec<String>,
}

/// Validate an artifact on disk against the host's expectations.
pub fn validate(
    path: &Path,
    expected_name: &str,
    max_size: u64,
) -> Result<ValidationReport, ValidationError> {
    // 1. Exists and is non-empty
    let metadata = std::fs::metadata(path).map_err(|_| ValidationError::Empty)?;
    let file_size = metadata.len();
    if file_size == 0 {
        return Err(ValidationError::Empty);
    }

    // 2. Size cap
    if file_size > max_size {
        return Err(ValidationError::TooLarge {
            size: file_size,
            max: max_size,
        });
    }

    // 3. Platform dynamic-library extension
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    if extension != std::env::consts::DLL_EXTENSION {
        return Err(ValidationError::WrongFormat(format!(
            "expected .{} artifact, got {:?}",
            std::env::consts::DLL_EXTENSION,
            extension
        )));
    }

    let bytes =
        std::fs::read(path).map_err(|e| ValidationError::WrongFormat(format!("unreadable: {e}")))?;

    // 4. Binary format magic
    let format = detect_format(&bytes).ok_or_else(|| {
        ValidationError::WrongFormat("first bytes are not a known dynamic-library magic".into())
    })?;

    let mut report = ValidationReport {
        file_size,
        toolchain: format.toolchain(),
        warnings: Vec::new(),
    };

    // 5. Toolchain marker: major.minor must match the host's rustc
    match extract_abi_version(&bytes) {
        Some(artifact_version) => {
            if major_minor(&artifact_version) != major_minor(RUSTC_VERSION) {
                return Err(ValidationError::ToolchainMismatch {
                    artifact: artifact_version,
                    host: RUSTC_VERSION.to_string(),
                });
            }
            report.toolchain.build_version = artifact_version;
        }
        None => {
            tracing::warn!(
                plugin = expected_name,
                "artifact carries no toolchain marker, skipping ABI version check"
            );
            report
                .warnings
                .push("no toolchain marker found; ABI version check skipped".into());
        }
    }

    // 6. Constructor symbol must be present
    if find(&bytes, DECLARATION_SYMBOL_NAME.as_bytes()).is_none() {
        return Err(ValidationError::SymbolMissing(
            DECLARATION_SYMBOL_NAME.to_string(),
        ));
    }

    // 7. Security floor: minimum size and a coherent header
    if file_size < MIN_ARTIFACT_SIZE {
        return Err(ValidationError::SecurityReject(format!(
            "{file_size} bytes is implausibly small for a dynamic library"
        )));
    }

    Ok(report)
}

/// Recognized artifact container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryFormat {
    Elf { machine: u16 },
    MachO,
    Pe,
}

impl BinaryFormat {
    fn toolchain(&self) -> ToolchainInfo {
        match self {
            BinaryFormat::Elf { machine } => ToolchainInfo {
                build_version: String::new(),
                os: "linux".into(),
                arch: match machine {
                    0x3e => "x86_64".into(),
                    0xb7 => "aarch64".into(),
                    other => format!("elf-machine-{other:#x}"),
                },
            },
            BinaryFormat::MachO => ToolchainInfo {
                build_version: String::new(),
                os: "macos".into(),
                arch: String::new(),
            },
            BinaryFormat::Pe => ToolchainInfo {
                build_version: String::new(),
                os: "windows".into(),
                arch: String::new(),
            },
        }
    }
}

fn detect_format(bytes: &[u8]) -> Option<BinaryFormat> {
    if bytes.len() < 20 {
        return None;
    }
    if &bytes[..4] == b"\x7fELF" {
        let machine = u16::from_le_bytes([bytes[18], bytes[19]]);
        return Some(BinaryFormat::Elf { machine });
    }
    let magic32 = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if matches!(
        magic32,
        0xfeedface | 0xfeedfacf | 0xcefaedfe | 0xcffaedfe | 0xcafebabe
    ) {
        return Some(BinaryFormat::MachO);
    }
    if &bytes[..2] == b"MZ" {
        return Some(BinaryFormat::Pe);
    }
    None
}

/// Scan artifact bytes for the `strato-abi:<version>` marker the SDK macro
/// embeds, returning the version string.
fn extract_abi_version(bytes: &[u8]) -> Option<String> {
    let start = find(bytes, ABI_MARKER_PREFIX.as_bytes())? + ABI_MARKER_PREFIX.len();
    let version: Vec<u8> = bytes[start..]
        .iter()
        .take_while(|b| b.is_ascii_digit() || **b == b'.')
        .copied()
        .collect();
    if version.is_empty() {
        return None;
    }
    String::from_utf8(version).ok()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
