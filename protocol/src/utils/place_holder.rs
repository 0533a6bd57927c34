use std::collections::HashMap;
use strfmt::FmtError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlaceHolderError {
    #[error("formatting error: {0}")]
    FormatError(#[from] FmtError),
}

/// Renders `{name}` placeholders, e.g. in launch commands (`{java} -Xmx{max_memory}M ...`).
/// Literal braces are written as `{{` / `}}`.
pub trait PlaceHolderRender {
    fn render(&self, vars: &HashMap<String, String>) -> Result<String, PlaceHolderError>;
}

impl<T: AsRef<str> + ?Sized> PlaceHolderRender for T {
    fn render(&self, vars: &HashMap<String, String>) -> Result<String, PlaceHolderError> {
        let template = self.as_ref();
        if !template.contains('{') && !template.contains('}') {
            return Ok(template.to_owned());
        }
        strfmt::strfmt(template, vars).map_err(PlaceHolderError::FormatError)
    }
}
