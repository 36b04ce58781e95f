use crate::error::{PmdError, Result};

/// Physical layout of iterations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationEncoding {
    /// One physical file per iteration
    FileBased,
    /// One physical file, iterations as groups inside it
    GroupBased,
}

impl IterationEncoding {
    /// Value of the `iterationEncoding` attribute
    pub fn as_str(self) -> &'static str {
        match self {
            IterationEncoding::FileBased => "fileBased",
            IterationEncoding::GroupBased => "groupBased",
        }
    }
}

/// Parsed path template of a series.
///
/// `out/data_%T.json` and `out/data_%06T.json` select file-based layout;
/// a template without placeholder selects group-based layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FileNaming {
    pattern: String,
    directory: String,
    prefix: String,
    suffix: String,
    padding: usize,
    encoding: IterationEncoding,
}

fn join(directory: &str, name: &str) -> String {
    if directory.is_empty() {
        name.to_string()
    } else {
        format!("{directory}/{name}")
    }
}

impl FileNaming {
    pub(crate) fn parse(pattern: &str) -> Result<Self> {
        let (directory, base) = pattern.rsplit_once('/').unwrap_or(("", pattern));
        if directory.contains("%T") {
            return Err(PmdError::InvalidState(format!(
                "iteration placeholder must be part of the file name: '{pattern}'"
            )));
        }

        let Some(start) = base.find('%') else {
            return Ok(Self {
                pattern: pattern.to_string(),
                directory: directory.to_string(),
                prefix: base.to_string(),
                suffix: String::new(),
                padding: 0,
                encoding: IterationEncoding::GroupBased,
            });
        };

        let rest = &base[start + 1..];
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        let suffix = rest[digits.len()..].strip_prefix('T').ok_or_else(|| {
            PmdError::InvalidState(format!("unsupported placeholder in '{pattern}', expected %T or %0<N>T"))
        })?;
        if suffix.contains('%') {
            return Err(PmdError::InvalidState(format!(
                "more than one placeholder in '{pattern}'"
            )));
        }
        let padding = if digits.is_empty() {
            0
        } else {
            digits.parse().map_err(|_| {
                PmdError::InvalidState(format!("invalid padding '{digits}' in '{pattern}'"))
            })?
        };

        Ok(Self {
            pattern: pattern.to_string(),
            directory: directory.to_string(),
            prefix: base[..start].to_string(),
            suffix: suffix.to_string(),
            padding,
            encoding: IterationEncoding::FileBased,
        })
    }

    pub(crate) fn encoding(&self) -> IterationEncoding {
        self.encoding
    }

    pub(crate) fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Directory holding the series' files, empty for the working directory
    pub(crate) fn directory(&self) -> &str {
        &self.directory
    }

    /// File holding `index`
    pub(crate) fn file_for(&self, index: u64) -> String {
        match self.encoding {
            IterationEncoding::GroupBased => self.pattern.clone(),
            IterationEncoding::FileBased => join(
                &self.directory,
                &format!(
                    "{}{index:0width$}{}",
                    self.prefix,
                    self.suffix,
                    width = self.padding
                ),
            ),
        }
    }

    /// The single file of a group-based series
    pub(crate) fn series_file(&self) -> &str {
        &self.pattern
    }

    /// Iteration index encoded in a directory entry, if it matches
    pub(crate) fn match_file(&self, name: &str) -> Option<u64> {
        if self.encoding != IterationEncoding::FileBased {
            return None;
        }
        let digits = name
            .strip_prefix(self.prefix.as_str())?
            .strip_suffix(self.suffix.as_str())?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    /// Full path of a directory entry
    pub(crate) fn in_directory(&self, name: &str) -> String {
        join(&self.directory, name)
    }

    /// Value of the `iterationFormat` attribute
    pub(crate) fn iteration_format(&self, base_path: &str) -> String {
        match self.encoding {
            IterationEncoding::FileBased => self
                .pattern
                .rsplit('/')
                .next()
                .unwrap_or(&self.pattern)
                .to_string(),
            IterationEncoding::GroupBased => base_path.to_string(),
        }
    }
}

/// In-file path of an iteration group for a `basePath` such as `/data/%T/`
pub(crate) fn iteration_path(base_path: &str, index: u64) -> String {
    let path = base_path.replace("%T", &index.to_string());
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Group under which iterations are listed, e.g. `/data` for `/data/%T/`
pub(crate) fn iterations_group(base_path: &str) -> String {
    let prefix = base_path.split("%T").next().unwrap_or(base_path);
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Group name for a `meshesPath` / `particlesPath` value such as `meshes/`
pub(crate) fn container_name(path: &str) -> String {
    path.trim_matches('/').to_string()
}
