//! Platform alteration checks.
//!
//! Inspects the local kernel taint state: the bitmask in
//! `/proc/sys/kernel/tainted` and the per-module taint letters in
//! `/sys/module/*/taint`.
//!
//! # Graceful Degradation
//!
//! - Not on Linux (no taint mask file): the check is skipped
//! - Mask or module taints unreadable: the node is reported non-compliant
//!   with the error as a field
//!
//! Nothing here panics. Read and parse failures are returned as
//! [`TaintError`] for the check body to report.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::data::report::ReportObject;
use crate::engine::check::Check;

pub const TAINTED_NODE_KERNEL: &str = "tainted-node-kernel";

const TAINT_MASK_FILE: &str = "proc/sys/kernel/tainted";
const MODULES_DIR: &str = "sys/module";

pub const FIELD_ERROR: &str = "Error";
pub const FIELD_TAINT_MASK: &str = "Taint Mask";
pub const FIELD_TAINTS: &str = "Taints";
pub const FIELD_TAINT_BIT: &str = "Taint Bit";
pub const FIELD_MODULE_NAME: &str = "Module Name";

#[derive(Debug, Error)]
pub enum TaintError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode taints mask {value:?}: {source}")]
    InvalidMask {
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("letter {letter} does not belong to any known kernel taint")]
    UnknownLetter { letter: char },
    #[error("module {module} has invalid taint letter {letter}")]
    InvalidModuleLetter { module: String, letter: char },
}

/// A kernel taint bit: its description and the letters that report it.
struct KernelTaint {
    bit: u32,
    description: &'static str,
    letters: &'static str,
}

const fn taint(bit: u32, description: &'static str, letters: &'static str) -> KernelTaint {
    KernelTaint {
        bit,
        description,
        letters,
    }
}

// Ordered by bit; letter lookups take the lowest bit carrying the letter.
const KERNEL_TAINTS: &[KernelTaint] = &[
    taint(0, "proprietary module was loaded", "GP"),
    taint(1, "module was force loaded", "F"),
    taint(2, "kernel running on an out of specification system", "S"),
    taint(3, "module was force unloaded", "R"),
    taint(4, "processor reported a Machine Check Exception (MCE)", "M"),
    taint(5, "bad page referenced or some unexpected page flags", "B"),
    taint(6, "taint requested by userspace application", "U"),
    taint(7, "kernel died recently, i.e. there was an OOPS or BUG", "D"),
    taint(8, "ACPI table overridden by user", "A"),
    taint(9, "kernel issued warning", "W"),
    taint(10, "staging driver was loaded", "C"),
    taint(11, "workaround for bug in platform firmware applied", "I"),
    taint(12, "externally-built (\"out-of-tree\") module was loaded", "O"),
    taint(13, "unsigned module was loaded", "E"),
    taint(14, "soft lockup occurred", "L"),
    taint(15, "kernel has been live patched", "K"),
    taint(16, "auxiliary taint, defined for and used by distros", "X"),
    taint(17, "kernel was built with the struct randomization plugin", "T"),
    taint(18, "an in-kernel test has been run", "N"),
    // Red Hat extensions for RHEL/CoreOS
    taint(
        27,
        "Red Hat extension: Hardware for which support has been removed. / OMGZOMBIES easter egg",
        "Zrh",
    ),
    taint(
        28,
        "Red Hat extension: Unsupported hardware. Refer to \"UNSUPPORTED HARDWARE DEVICE:\" kernel log entry for details",
        "H",
    ),
    taint(
        29,
        "Red Hat extension: Technology Preview code was loaded; cf. Technology Preview features support scope description. Refer to \"TECH PREVIEW:\" kernel log entry for details",
        "Tt",
    ),
    taint(
        30,
        "BPF syscall has either been configured or enabled for unprivileged users/programs",
        "u",
    ),
    taint(
        31,
        "BPF syscall has either been configured or enabled for unprivileged users/programs",
        "u",
    ),
];

fn known_taint(bit: u32) -> Option<&'static KernelTaint> {
    KERNEL_TAINTS.iter().find(|t| t.bit == bit)
}

fn taint_for_letter(letter: char) -> Option<&'static KernelTaint> {
    KERNEL_TAINTS.iter().find(|t| t.letters.contains(letter))
}

/// Human readable message for a taint bit.
pub fn taint_msg(bit: u32) -> String {
    match known_taint(bit) {
        Some(t) => format!("{} (tainted bit {})", t.description, bit),
        None => format!("reserved (tainted bit {})", bit),
    }
}

/// One message per set bit, lowest bit first.
pub fn decode_taints_from_bitmask(mask: u64) -> Vec<String> {
    (0..64)
        .filter(|bit| mask & (1u64 << bit) != 0)
        .map(taint_msg)
        .collect()
}

/// One message per letter. Unknown letters are reported, not rejected.
pub fn decode_taints_from_letters(letters: &str) -> Vec<String> {
    letters
        .chars()
        .map(|letter| match taint_for_letter(letter) {
            Some(t) => format!(
                "{} (taint letter:{}, bit:{})",
                t.description, letter, t.bit
            ),
            None => format!("unknown taint (letter {})", letter),
        })
        .collect()
}

pub fn bit_from_letter(letter: char) -> Result<u32, TaintError> {
    taint_for_letter(letter)
        .map(|t| t.bit)
        .ok_or(TaintError::UnknownLetter { letter })
}

/// Every bit set by at least one module.
pub fn tainted_bits_by_modules(
    tainters: &BTreeMap<String, String>,
) -> Result<BTreeSet<u32>, TaintError> {
    let mut bits = BTreeSet::new();
    for (module, letters) in tainters {
        for letter in letters.chars() {
            let bit = bit_from_letter(letter).map_err(|_| TaintError::InvalidModuleLetter {
                module: module.clone(),
                letter,
            })?;
            bits.insert(bit);
        }
    }
    Ok(bits)
}

/// Bits set in `mask` that no module accounts for.
pub fn other_tainted_bits(mask: u64, bits_by_modules: &BTreeSet<u32>) -> Vec<u32> {
    (0..64)
        .filter(|bit| mask & (1u64 << bit) != 0 && !bits_by_modules.contains(bit))
        .collect()
}

/// Reads taint state below a filesystem root (`/` on a live system).
#[derive(Debug, Clone)]
pub struct TaintInspector {
    root: PathBuf,
    allow_list: BTreeSet<String>,
}

impl TaintInspector {
    pub fn new(root: impl Into<PathBuf>, allow_list: &[String]) -> Self {
        TaintInspector {
            root: root.into(),
            allow_list: allow_list.iter().cloned().collect(),
        }
    }

    pub fn allow_list(&self) -> &BTreeSet<String> {
        &self.allow_list
    }

    pub fn has_taint_mask(&self) -> bool {
        self.root.join(TAINT_MASK_FILE).is_file()
    }

    /// Node name, from `/etc/hostname` or the kernel.
    pub fn node_name(&self) -> String {
        ["etc/hostname", "proc/sys/kernel/hostname"]
            .iter()
            .filter_map(|rel| fs::read_to_string(self.root.join(rel)).ok())
            .map(|name| name.trim().to_string())
            .find(|name| !name.is_empty())
            .unwrap_or_else(|| "localhost".to_string())
    }

    pub fn kernel_taints_mask(&self) -> Result<u64, TaintError> {
        let path = self.root.join(TAINT_MASK_FILE);
        let raw = read(&path)?;
        let value: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        value
            .parse::<u64>()
            .map_err(|source| TaintError::InvalidMask { value, source })
    }

    /// Modules with a non-empty taint file, keyed by module name.
    pub fn all_tainter_modules(&self) -> Result<BTreeMap<String, String>, TaintError> {
        let dir = self.root.join(MODULES_DIR);
        let entries = fs::read_dir(&dir).map_err(|source| TaintError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut tainters = BTreeMap::new();
        for entry in entries.flatten() {
            let taint_file = entry.path().join("taint");
            if !taint_file.is_file() {
                continue;
            }
            let letters = read(&taint_file)?.trim().to_string();
            if !letters.is_empty() {
                tainters.insert(entry.file_name().to_string_lossy().into_owned(), letters);
            }
        }
        Ok(tainters)
    }

    /// Tainting modules minus the allow-listed ones, and the bits set by all
    /// tainting modules.
    pub fn tainter_modules(
        &self,
    ) -> Result<(BTreeMap<String, String>, BTreeSet<u32>), TaintError> {
        let all = self.all_tainter_modules()?;
        let bits = tainted_bits_by_modules(&all)?;

        let filtered = all
            .into_iter()
            .filter(|(module, letters)| {
                if self.allow_list.contains(module) {
                    debug!(module = %module, taints = %letters, "tainting module is allow-listed");
                    false
                } else {
                    true
                }
            })
            .collect();
        Ok((filtered, bits))
    }
}

fn read(path: &Path) -> Result<String, TaintError> {
    fs::read_to_string(path).map_err(|source| TaintError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Skip predicate: the kernel taint interface is Linux only.
pub fn skip_if_no_taint_mask(inspector: &TaintInspector) -> Option<String> {
    if inspector.has_taint_mask() {
        None
    } else {
        Some(format!(
            "{} not found, not running on Linux",
            inspector.root.join(TAINT_MASK_FILE).display()
        ))
    }
}

/// Body of the tainted kernel check.
pub fn test_tainted_kernel(check: &Check, inspector: &TaintInspector) -> anyhow::Result<()> {
    let mut compliant = Vec::new();
    let mut non_compliant = Vec::new();

    check.log_info(format!("Modules allowlist: {:?}", inspector.allow_list()));
    let node = inspector.node_name();
    check.log_info(format!("Testing node {:?}", node));

    inspect_node(check, inspector, &node, &mut compliant, &mut non_compliant);

    check.set_result(&compliant, &non_compliant);
    Ok(())
}

fn inspect_node(
    check: &Check,
    inspector: &TaintInspector,
    node: &str,
    compliant: &mut Vec<ReportObject>,
    non_compliant: &mut Vec<ReportObject>,
) {
    let mask = match inspector.kernel_taints_mask() {
        Ok(mask) => mask,
        Err(e) => {
            check.log_error(format!(
                "Failed to retrieve kernel taint information from node {:?}, err: {}",
                node, e
            ));
            non_compliant.push(
                ReportObject::node(node, "Failed to retrieve kernel taint information from node", false)
                    .with_field(FIELD_ERROR, e),
            );
            return;
        }
    };

    if mask == 0 {
        check.log_info(format!("Node {:?} has no non-approved kernel taints.", node));
        compliant.push(ReportObject::node(node, "Node has no non-approved kernel taints", true));
        return;
    }

    let taints = decode_taints_from_bitmask(mask);
    check.log_info(format!(
        "Node {:?} kernel is tainted. Taints mask={} - Decoded taints: {:?}",
        node, mask, taints
    ));

    if inspector.allow_list().is_empty() {
        let taints = taints.join(",");
        check.log_error(format!(
            "Node {:?} contains taints not covered by module allowlist. Taints: {:?} (mask={})",
            node, taints, mask
        ));
        non_compliant.push(
            ReportObject::node(node, "Node contains taints not covered by module allowlist", false)
                .with_field(FIELD_TAINT_MASK, mask)
                .with_field(FIELD_TAINTS, taints),
        );
        return;
    }

    let (tainters, bits_by_modules) = match inspector.tainter_modules() {
        Ok(found) => found,
        Err(e) => {
            check.log_error(format!(
                "Could not get tainter modules from node {:?}, err: {}",
                node, e
            ));
            non_compliant.push(
                ReportObject::node(node, "Failed to get tainter modules", false)
                    .with_field(FIELD_ERROR, e),
            );
            return;
        }
    };

    let mut compliant_node = true;

    for (module, letters) in &tainters {
        for (letter, taint) in letters.chars().zip(decode_taints_from_letters(letters)) {
            check.log_error(format!(
                "Node {:?} - module {:?} taints kernel: {:?}",
                node, module, taint
            ));
            let mut obj = ReportObject::kernel_taint(node, &taint, false);
            if let Ok(bit) = bit_from_letter(letter) {
                obj = obj.with_field(FIELD_TAINT_BIT, bit);
            }
            non_compliant.push(obj.with_field(FIELD_MODULE_NAME, module));
            compliant_node = false;
        }
    }

    for bit in other_tainted_bits(mask, &bits_by_modules) {
        check.log_error(format!(
            "Node {:?} - taint bit {} is set but it is not caused by any module.",
            node, bit
        ));
        non_compliant.push(
            ReportObject::kernel_taint(node, &taint_msg(bit), false)
                .with_field(FIELD_TAINT_BIT, bit)
                .with_field(FIELD_MODULE_NAME, "N/A"),
        );
        compliant_node = false;
    }

    if compliant_node {
        check.log_info(format!("Node {:?} passed the tainted kernel check", node));
        compliant.push(ReportObject::node(node, "Passed the tainted kernel check", true));
    }
}
