//! A renderer of `tera` templates (jinja style), used by the script
//! builders to interpolate per-job values (job name, assigned ports,
//! replica index, remote paths) into directive lines, environment values,
//! and run-block commands.
use std::collections::BTreeMap;
use tera::{Context, Tera};

use Result;

/// Render a one-off template string against a flat string context.
///
/// Mirrors the one-off `tera` rendering the original library used for
/// templated environment variables (`"{{ base_urls.services }}/auth/internal"`)
/// but with a plain string map instead of a full region/config context,
/// since batch scripts only ever interpolate job-local values.
pub fn render(template: &str, values: &BTreeMap<String, String>) -> Result<String> {
    let mut ctx = Context::new();
    for (k, v) in values {
        ctx.insert(k, v);
    }
    Tera::one_off(template, &ctx, false).map_err(|e| e.into())
}
