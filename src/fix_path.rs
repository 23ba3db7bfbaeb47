use std::{
    borrow::Cow,
    fs::{self, File},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::debug;

use crate::error::ConvertError;

pub const DEFAULT_HTML: &str = "vis/public/index.html";
pub const DEFAULT_BUNDLE: &str = "whymon.bc.js";
pub const DEFAULT_BUNDLE_DIR: &str = "whymon";

/// A script bundle that is referenced either bare (`whymon.bc.js`) or from
/// its directory (`whymon/whymon.bc.js`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlePath {
    bare: String,
    nested: String,
}

impl BundlePath {
    pub fn new(dir: &str, bundle: &str) -> Self {
        BundlePath {
            bare: bundle.to_owned(),
            nested: format!("{dir}/{bundle}"),
        }
    }

    /// Swaps the nested reference for the bare one, or the other way round.
    /// Lines without the bundle come back borrowed.
    pub fn toggle<'a>(&self, line: &'a str) -> Cow<'a, str> {
        if line.contains(&self.nested) {
            Cow::Owned(line.replace(&self.nested, &self.bare))
        } else if line.contains(&self.bare) {
            Cow::Owned(line.replace(&self.bare, &self.nested))
        } else {
            Cow::Borrowed(line)
        }
    }
}

impl Default for BundlePath {
    fn default() -> Self {
        BundlePath::new(DEFAULT_BUNDLE_DIR, DEFAULT_BUNDLE)
    }
}

/// `vis/public/index.html` is staged as `vis/public/index_fixed.html`.
pub fn fixed_path_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_fixed.{}", ext.to_string_lossy()),
        None => format!("{stem}_fixed"),
    };
    path.with_file_name(name)
}

/// Rewrites `path` in place with every bundle reference toggled. Returns the
/// number of lines that changed.
pub fn fix_path(path: &Path, bundle: &BundlePath) -> Result<usize, ConvertError> {
    let staged = fixed_path_for(path);
    let mut reader = BufReader::new(File::open(path)?);
    let mut out = BufWriter::new(File::create(&staged)?);

    let mut line = String::new();
    let mut changed = 0;
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }

        let toggled = bundle.toggle(&line);
        if let Cow::Owned(_) = toggled {
            changed += 1;
        }
        out.write_all(toggled.as_bytes())?;
    }

    out.flush()?;
    drop(out);

    fs::rename(&staged, path)?;
    debug!(path = %path.display(), changed, "replaced file with fixed copy");
    Ok(changed)
}
