//! Persisted templates: load, save (atomic), path derivation.

use super::error::{Result, SynthError};
use super::template::Template;
use std::path::{Path, PathBuf};

/// Path of a stack's synthesized template within the output directory.
pub fn template_path(out_dir: &Path, stack: &str) -> PathBuf {
    out_dir.join(format!("{}.template.json", stack))
}

/// Load a stack's last synthesized template. Returns None if there is none.
pub fn load_template(out_dir: &Path, stack: &str) -> Result<Option<Template>> {
    let path = template_path(out_dir, stack);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path).map_err(|e| SynthError::io(&path, e))?;
    Ok(Some(Template::from_json(&content)?))
}

/// Save a template atomically (write to temp, then rename).
pub fn save_template(out_dir: &Path, stack: &str, template: &Template) -> Result<PathBuf> {
    std::fs::create_dir_all(out_dir).map_err(|e| SynthError::io(out_dir, e))?;
    let path = template_path(out_dir, stack);
    let mut json = template.to_json_pretty()?;
    json.push('\n');

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &json).map_err(|e| SynthError::io(&tmp_path, e))?;
    std::fs::rename(&tmp_path, &path).map_err(|e| SynthError::io(&path, e))?;

    Ok(path)
}
