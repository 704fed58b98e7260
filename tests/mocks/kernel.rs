//! Fake kernel taint interface under a temporary root.

use std::fs;

use tempfile::TempDir;

/// Taint state of a simulated node.
#[derive(Debug, Clone)]
pub struct MockKernel {
    pub hostname: String,
    pub taint_mask: String,
    pub modules: Vec<(String, String)>,
}

impl Default for MockKernel {
    fn default() -> Self {
        MockKernel {
            hostname: "worker-0".to_string(),
            taint_mask: "0".to_string(),
            modules: Vec::new(),
        }
    }
}

impl MockKernel {
    pub fn tainted(mask: u64) -> Self {
        MockKernel {
            taint_mask: format!("{}\n", mask),
            ..MockKernel::default()
        }
    }

    pub fn with_module(mut self, name: &str, taint: &str) -> Self {
        self.modules.push((name.to_string(), taint.to_string()));
        self
    }

    /// Write `/etc/hostname`, `/proc/sys/kernel/tainted` and
    /// `/sys/module/*/taint` below a fresh temporary directory.
    pub fn build(&self) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        fs::create_dir_all(root.join("etc")).unwrap();
        fs::write(root.join("etc/hostname"), format!("{}\n", self.hostname)).unwrap();

        fs::create_dir_all(root.join("proc/sys/kernel")).unwrap();
        fs::write(root.join("proc/sys/kernel/tainted"), &self.taint_mask).unwrap();

        fs::create_dir_all(root.join("sys/module")).unwrap();
        for (name, taint) in &self.modules {
            let module_dir = root.join("sys/module").join(name);
            fs::create_dir_all(&module_dir).unwrap();
            fs::write(module_dir.join("taint"), taint).unwrap();
        }
        dir
    }
}
