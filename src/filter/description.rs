use crate::error::{IngestError, Result};
use log::{debug, warn};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Extension of filter description files.
pub const DESCRIPTION_EXTENSION: &str = "toml";

/// One external process filter, as declared in a description file.
///
/// ```toml
/// [[filter]]
/// name = "mp3"
/// command = "ffmpeg -i - -f mp3 -"
/// content_type = "MP3"
/// mime_type = "audio/mpeg"
/// content_ext = ".mp3"
/// logging = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CustomFilterDescription {
    pub name: String,
    /// Program and arguments. Double quotes group an argument containing spaces.
    pub command: String,
    /// Content type this filter expects, any when unset
    #[serde(default)]
    pub input_content_type: Option<String>,
    /// Content type of the output, replacing the channel's
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub content_ext: Option<String>,
    /// Log the child's standard error
    #[serde(default)]
    pub logging: bool,
    /// Working directory of the child: the directory of the description file
    #[serde(skip)]
    pub base_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct DescriptionFile {
    #[serde(default)]
    filter: Vec<CustomFilterDescription>,
}

impl CustomFilterDescription {
    /// Parses the `[[filter]]` tables of one description file.
    pub fn parse(text: &str, base_path: &Path) -> Result<Vec<Self>> {
        let file: DescriptionFile = toml::from_str(text)?;
        file.filter
            .into_iter()
            .map(|mut desc| {
                desc.validate()?;
                desc.base_path = base_path.to_path_buf();
                Ok(desc)
            })
            .collect()
    }

    /// Loads one description file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Vec<Self>> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| IngestError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let base_path = path
            .canonicalize()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| path.parent().map(Path::to_path_buf).unwrap_or_default());
        Self::parse(&text, &base_path)
    }

    /// Loads every description file of a directory, in file name order.
    /// Files that fail to load are skipped with a warning.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Vec<Self>> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            debug!("filter directory {} does not exist", dir.display());
            return Ok(Vec::new());
        }
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && path.extension().and_then(|ext| ext.to_str()) == Some(DESCRIPTION_EXTENSION)
            })
            .collect();
        files.sort();

        let mut descriptions = Vec::new();
        for file in files {
            match Self::load(&file) {
                Ok(loaded) => descriptions.extend(loaded),
                Err(err) => warn!("skipping filter description {}: {}", file.display(), err),
            }
        }
        Ok(descriptions)
    }

    /// Splits the command line into program and arguments.
    pub fn command_args(&self) -> Result<Vec<String>> {
        let pattern = Regex::new(r#""([^"]+)"|(\S+)"#)
            .map_err(|e| IngestError::Config(e.to_string()))?;
        let args: Vec<String> = pattern
            .captures_iter(&self.command)
            .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
            .map(|m| m.as_str().to_string())
            .collect();
        if args.is_empty() {
            return Err(IngestError::Config(format!("filter {} has an empty command", self.name)));
        }
        Ok(args)
    }

    /// Whether the filter takes input of `content_type`.
    pub fn accepts(&self, content_type: &str) -> bool {
        match &self.input_content_type {
            Some(input) if !input.is_empty() => input.eq_ignore_ascii_case(content_type),
            _ => true,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(IngestError::Config("filter without a name".into()));
        }
        if self.command.trim().is_empty() {
            return Err(IngestError::Config(format!("filter {} has an empty command", self.name)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn description(command: &str) -> CustomFilterDescription {
        CustomFilterDescription {
            name: "test".into(),
            command: command.into(),
            input_content_type: None,
            content_type: None,
            mime_type: None,
            content_ext: None,
            logging: false,
            base_path: PathBuf::new(),
        }
    }

    #[test]
    fn test_parse_filters() {
        let text = r#"
            [[filter]]
            name = "mp3"
            command = "ffmpeg -i - -f mp3 -"
            input_content_type = "TS"
            content_type = "MP3"
            mime_type = "audio/mpeg"
            content_ext = ".mp3"
            logging = true

            [[filter]]
            name = "copy"
            command = "cat"
        "#;
        let filters = CustomFilterDescription::parse(text, Path::new("/opt/filters")).unwrap();
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].content_type.as_deref(), Some("MP3"));
        assert!(filters[0].logging);
        assert_eq!(filters[1].content_type, None);
        assert!(!filters[1].logging);
        assert_eq!(filters[1].base_path, PathBuf::from("/opt/filters"));
    }

    #[test]
    fn test_missing_command_is_rejected() {
        let text = "[[filter]]\nname = \"x\"\n";
        let err = CustomFilterDescription::parse(text, Path::new(".")).unwrap_err();
        assert!(matches!(err, IngestError::Toml(_)));

        let text = "[[filter]]\nname = \"x\"\ncommand = \" \"\n";
        let err = CustomFilterDescription::parse(text, Path::new(".")).unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
    }

    #[test]
    fn test_command_args_respect_quotes() {
        let desc = description(r#"ffmpeg -i - -metadata "title=My Channel" -f  mp3 -"#);
        assert_eq!(
            desc.command_args().unwrap(),
            vec!["ffmpeg", "-i", "-", "-metadata", "title=My Channel", "-f", "mp3", "-"]
        );
        assert!(description("   ").command_args().is_err());
    }

    #[test]
    fn test_accepts() {
        let mut desc = description("cat");
        assert!(desc.accepts("MKV"));
        desc.input_content_type = Some("ts".into());
        assert!(desc.accepts("TS"));
        assert!(!desc.accepts("MKV"));
    }

    #[test]
    fn test_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        let cat = |name: &str| format!("[[filter]]\nname = \"{}\"\ncommand = \"cat\"\n", name);
        fs::write(dir.path().join("b.toml"), cat("b")).unwrap();
        fs::write(dir.path().join("a.toml"), cat("a")).unwrap();
        fs::write(dir.path().join("broken.toml"), "[[filter]\n").unwrap();
        fs::write(dir.path().join("notes.txt"), cat("c")).unwrap();

        let filters = CustomFilterDescription::load_dir(dir.path()).unwrap();
        let names: Vec<&str> = filters.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        let base = dir.path().canonicalize().unwrap();
        assert!(filters.iter().all(|f| f.base_path == base));
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let filters = CustomFilterDescription::load_dir("/nonexistent/peca/filters").unwrap();
        assert!(filters.is_empty());
    }
}
