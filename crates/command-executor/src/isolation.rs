//! Isolation specifications.
//!
//! An [`IsolationSpec`] is the validated, immutable form of the user's `--isolated`
//! stack plus per-level option values. Every configuration problem is detected here,
//! before any driver runs.

use std::fmt;
use std::str::FromStr;

use regex::Regex;

use crate::error::{Error, Result};
use crate::probe::Tool;

/// Deepest supported stack of nested environments
pub const MAX_DEPTH: usize = 7;

/// Sequence token meaning "not applicable at this level"
pub const PLACEHOLDER: &str = "_";

/// Kinds of isolation environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// No isolation: the platform shell on the current host
    Local,
    /// GNU screen session
    Screen,
    /// tmux session
    Tmux,
    /// Docker container
    Docker,
    /// Remote host over ssh
    Ssh,
}

impl Backend {
    /// All backends, in the order they are listed to users
    pub const ALL: [Backend; 5] = [
        Backend::Local,
        Backend::Screen,
        Backend::Tmux,
        Backend::Docker,
        Backend::Ssh,
    ];

    /// Name accepted on the command line
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Local => "local",
            Backend::Screen => "screen",
            Backend::Tmux => "tmux",
            Backend::Docker => "docker",
            Backend::Ssh => "ssh",
        }
    }

    /// The external tool this backend drives
    pub fn tool(self) -> Option<Tool> {
        match self {
            Backend::Local => None,
            Backend::Screen => Some(Tool::Screen),
            Backend::Tmux => Some(Tool::Tmux),
            Backend::Docker => Some(Tool::Docker),
            Backend::Ssh => Some(Tool::Ssh),
        }
    }

    /// Whether running here creates a resource with a session handle
    pub fn has_session(self) -> bool {
        !matches!(self, Backend::Local)
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" | "none" => Ok(Backend::Local),
            "screen" => Ok(Backend::Screen),
            "tmux" => Ok(Backend::Tmux),
            "docker" => Ok(Backend::Docker),
            "ssh" => Ok(Backend::Ssh),
            other => Err(Error::configuration(format!(
                "Invalid isolation backend: \"{}\". Valid options are: {}",
                other,
                Backend::ALL.map(Backend::as_str).join(", ")
            ))),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options that can take a different value at each level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LevelOption {
    /// Session, container or remote log name
    Session,
    /// Container image
    Image,
    /// Remote endpoint (`user@host`)
    Endpoint,
    /// Run-as-user
    User,
}

impl LevelOption {
    /// All per-level options
    pub const ALL: [LevelOption; 4] = [
        LevelOption::Session,
        LevelOption::Image,
        LevelOption::Endpoint,
        LevelOption::User,
    ];

    /// Long CLI flag for this option
    pub fn flag(self) -> &'static str {
        match self {
            LevelOption::Session => "--session",
            LevelOption::Image => "--image",
            LevelOption::Endpoint => "--endpoint",
            LevelOption::User => "--isolated-user",
        }
    }

    /// Whether a value for this option means anything at a `backend` level
    pub fn applies_to(self, backend: Backend) -> bool {
        match self {
            LevelOption::Session => backend.has_session(),
            LevelOption::Image => backend == Backend::Docker,
            LevelOption::Endpoint => backend == Backend::Ssh,
            LevelOption::User => {
                matches!(backend, Backend::Local | Backend::Screen | Backend::Tmux)
            }
        }
    }

    /// Backends that accept this option, for messages
    pub fn applicable_backends(self) -> String {
        Backend::ALL
            .into_iter()
            .filter(|b| self.applies_to(*b))
            .map(Backend::as_str)
            .collect::<Vec<_>>()
            .join(" or ")
    }
}

/// Raw isolation input, as collected from the command line.
///
/// Each option keeps every occurrence so a flag given twice can be rejected rather
/// than silently resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IsolationRequest {
    /// Whitespace-separated backend names
    pub stack: String,
    /// `--session` occurrences
    pub session: Vec<String>,
    /// `--image` occurrences
    pub image: Vec<String>,
    /// `--endpoint` occurrences
    pub endpoint: Vec<String>,
    /// `--isolated-user` occurrences
    pub user: Vec<String>,
}

impl IsolationRequest {
    /// Request for the given stack with no options
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            ..Default::default()
        }
    }

    /// Add one occurrence of a per-level option
    pub fn with(mut self, option: LevelOption, value: impl Into<String>) -> Self {
        self.values_mut(option).push(value.into());
        self
    }

    /// Occurrences recorded for `option`
    pub fn values(&self, option: LevelOption) -> &[String] {
        match option {
            LevelOption::Session => &self.session,
            LevelOption::Image => &self.image,
            LevelOption::Endpoint => &self.endpoint,
            LevelOption::User => &self.user,
        }
    }

    fn values_mut(&mut self, option: LevelOption) -> &mut Vec<String> {
        match option {
            LevelOption::Session => &mut self.session,
            LevelOption::Image => &mut self.image,
            LevelOption::Endpoint => &mut self.endpoint,
            LevelOption::User => &mut self.user,
        }
    }
}

/// One environment in the stack with its resolved options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationLevel {
    /// Environment kind
    pub backend: Backend,
    /// Session handle requested by the user
    pub session: Option<String>,
    /// Container image
    pub image: Option<String>,
    /// Remote endpoint
    pub endpoint: Option<String>,
    /// Run-as-user
    pub user: Option<String>,
}

impl IsolationLevel {
    /// A level with no options set
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            session: None,
            image: None,
            endpoint: None,
            user: None,
        }
    }

    /// Value of a per-level option
    pub fn get(&self, option: LevelOption) -> Option<&str> {
        match option {
            LevelOption::Session => self.session.as_deref(),
            LevelOption::Image => self.image.as_deref(),
            LevelOption::Endpoint => self.endpoint.as_deref(),
            LevelOption::User => self.user.as_deref(),
        }
    }

    fn slot(&mut self, option: LevelOption) -> &mut Option<String> {
        match option {
            LevelOption::Session => &mut self.session,
            LevelOption::Image => &mut self.image,
            LevelOption::Endpoint => &mut self.endpoint,
            LevelOption::User => &mut self.user,
        }
    }

    /// Set a per-level option (builder style)
    pub fn with(mut self, option: LevelOption, value: impl Into<String>) -> Self {
        *self.slot(option) = Some(value.into());
        self
    }
}

/// A validated stack of isolation levels, outermost first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationSpec {
    levels: Vec<IsolationLevel>,
}

impl IsolationSpec {
    /// Validate raw CLI input into a spec
    pub fn from_request(request: &IsolationRequest) -> Result<Self> {
        let names: Vec<&str> = request.stack.split_whitespace().collect();
        if names.is_empty() {
            return Err(Error::configuration(
                "--isolated requires at least one backend",
            ));
        }
        if names.len() > MAX_DEPTH {
            return Err(Error::configuration(format!(
                "Isolation stack has {} levels; the maximum supported depth is {}",
                names.len(),
                MAX_DEPTH
            )));
        }

        let mut levels = names
            .iter()
            .map(|name| name.parse().map(IsolationLevel::new))
            .collect::<Result<Vec<_>>>()?;

        for option in LevelOption::ALL {
            let raw = match request.values(option) {
                [] => continue,
                [single] => single,
                _ => {
                    return Err(Error::configuration(format!(
                        "{} was given more than once; pass a single value or one sequence with {} for levels where it does not apply",
                        option.flag(),
                        PLACEHOLDER
                    )));
                }
            };
            distribute(option, raw, &mut levels)?;
        }

        Self::from_levels(levels)
    }

    /// Build a spec from already-resolved levels, checking cross-option rules
    pub fn from_levels(levels: Vec<IsolationLevel>) -> Result<Self> {
        if levels.is_empty() {
            return Err(Error::configuration(
                "--isolated requires at least one backend",
            ));
        }
        if levels.len() > MAX_DEPTH {
            return Err(Error::configuration(format!(
                "Isolation stack has {} levels; the maximum supported depth is {}",
                levels.len(),
                MAX_DEPTH
            )));
        }

        for (index, level) in levels.iter().enumerate() {
            for option in LevelOption::ALL {
                if level.get(option).is_some() && !option.applies_to(level.backend) {
                    return Err(Error::configuration(format!(
                        "{} is not valid for level {} ({}); it only applies to {}",
                        option.flag(),
                        index,
                        level.backend,
                        option.applicable_backends()
                    )));
                }
            }
            if level.backend == Backend::Ssh && level.endpoint.is_none() {
                return Err(Error::configuration(format!(
                    "SSH isolation at level {} requires --endpoint to specify the remote server (e.g., user@host)",
                    index
                )));
            }
            if let Some(user) = &level.user {
                validate_username(user)?;
            }
        }

        Ok(Self { levels })
    }

    /// Levels, outermost first
    pub fn levels(&self) -> &[IsolationLevel] {
        &self.levels
    }

    /// Number of nested environments
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// The outermost level and the spec left for the next nested invocation
    pub fn split_first(&self) -> (&IsolationLevel, Option<IsolationSpec>) {
        // Non-empty by construction
        let first = &self.levels[0];
        let rest = &self.levels[1..];
        let residual = (!rest.is_empty()).then(|| IsolationSpec {
            levels: rest.to_vec(),
        });
        (first, residual)
    }

    /// Whether any level uses the given backend
    pub fn uses(&self, backend: Backend) -> bool {
        self.levels.iter().any(|l| l.backend == backend)
    }

    /// Encode back into request form; decoding the result yields this spec again
    pub fn to_request(&self) -> IsolationRequest {
        let mut request = IsolationRequest::new(
            self.levels
                .iter()
                .map(|l| l.backend.as_str())
                .collect::<Vec<_>>()
                .join(" "),
        );
        for option in LevelOption::ALL {
            if self.levels.iter().all(|l| l.get(option).is_none()) {
                continue;
            }
            let sequence = self
                .levels
                .iter()
                .map(|l| l.get(option).unwrap_or(PLACEHOLDER))
                .collect::<Vec<_>>()
                .join(" ");
            request = request.with(option, sequence);
        }
        request
    }
}

impl fmt::Display for IsolationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.levels.iter().map(|l| l.backend.as_str()).collect();
        f.write_str(&names.join(" "))
    }
}

/// Spread one raw option value over the levels it applies to
fn distribute(option: LevelOption, raw: &str, levels: &mut [IsolationLevel]) -> Result<()> {
    let tokens: Vec<&str> = raw.split_whitespace().collect();

    match tokens.as_slice() {
        [] => Err(Error::configuration(format!(
            "{} requires a value",
            option.flag()
        ))),
        [single] if *single == PLACEHOLDER => Ok(()),
        [single] => replicate(option, single, levels),
        sequence if sequence.len() == levels.len() => {
            for (index, (level, token)) in levels.iter_mut().zip(sequence).enumerate() {
                if *token == PLACEHOLDER {
                    continue;
                }
                if !option.applies_to(level.backend) {
                    return Err(Error::configuration(format!(
                        "{} value \"{}\" given for level {} ({}), which does not accept it; use {} there",
                        option.flag(),
                        token,
                        index,
                        level.backend,
                        PLACEHOLDER
                    )));
                }
                *level.slot(option) = Some((*token).to_string());
            }
            Ok(())
        }
        sequence => Err(Error::configuration(format!(
            "{} has {} values but the isolation stack has {} levels",
            option.flag(),
            sequence.len(),
            levels.len()
        ))),
    }
}

fn replicate(option: LevelOption, value: &str, levels: &mut [IsolationLevel]) -> Result<()> {
    let mut applied = false;
    for level in levels.iter_mut().filter(|l| option.applies_to(l.backend)) {
        *level.slot(option) = Some(value.to_string());
        applied = true;
    }
    if applied {
        Ok(())
    } else {
        Err(Error::configuration(format!(
            "{} option is only valid with --isolated {}",
            option.flag(),
            option.applicable_backends()
        )))
    }
}

/// Check a user name is safe to hand to useradd/sudo
pub fn validate_username(name: &str) -> Result<()> {
    let valid = Regex::new(r"^[a-zA-Z0-9_-]+$")
        .map(|re| re.is_match(name))
        .unwrap_or(false);
    if !valid {
        return Err(Error::configuration(format!(
            "Invalid username format for --isolated-user: \"{}\". Username should contain only letters, numbers, hyphens, and underscores.",
            name
        )));
    }
    if name.len() > 32 {
        return Err(Error::configuration(format!(
            "Username too long for --isolated-user: \"{}\". Maximum length is 32 characters.",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(request: IsolationRequest) -> Result<IsolationSpec> {
        IsolationSpec::from_request(&request)
    }

    #[test]
    fn test_unknown_backend_is_configuration_error() {
        let err = spec(IsolationRequest::new("screen podman")).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("podman"));
    }

    #[test]
    fn test_depth_limit() {
        let seven = vec!["screen"; MAX_DEPTH].join(" ");
        assert_eq!(spec(IsolationRequest::new(seven)).unwrap().depth(), 7);

        let eight = vec!["screen"; MAX_DEPTH + 1].join(" ");
        assert!(spec(IsolationRequest::new(eight)).unwrap_err().is_configuration());
    }

    #[test]
    fn test_image_sequence_with_placeholder() {
        let s = spec(IsolationRequest::new("screen docker").with(LevelOption::Image, "_ alpine"))
            .unwrap();
        assert_eq!(s.levels()[0].image, None);
        assert_eq!(s.levels()[1].image.as_deref(), Some("alpine"));
    }

    #[test]
    fn test_sequence_length_mismatch() {
        let err = spec(
            IsolationRequest::new("screen docker").with(LevelOption::Image, "_ alpine ubuntu"),
        )
        .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("3 values"));
    }

    #[test]
    fn test_value_at_non_applicable_level() {
        let err = spec(IsolationRequest::new("screen docker").with(LevelOption::Image, "alpine _"))
            .unwrap_err();
        assert!(err.to_string().contains("level 0 (screen)"));
    }

    #[test]
    fn test_single_value_replicates_to_applicable_levels() {
        let s = spec(
            IsolationRequest::new("docker screen docker").with(LevelOption::Image, "ubuntu:24.04"),
        )
        .unwrap();
        let images: Vec<_> = s.levels().iter().map(|l| l.image.as_deref()).collect();
        assert_eq!(images, vec![Some("ubuntu:24.04"), None, Some("ubuntu:24.04")]);

        let err = spec(IsolationRequest::new("screen tmux").with(LevelOption::Image, "alpine"))
            .unwrap_err();
        assert!(err.to_string().contains("only valid with --isolated docker"));
    }

    #[test]
    fn test_repeated_flag_is_rejected() {
        let err = spec(
            IsolationRequest::new("screen docker")
                .with(LevelOption::Image, "alpine")
                .with(LevelOption::Image, "_ ubuntu"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_ssh_requires_endpoint() {
        assert!(spec(IsolationRequest::new("ssh")).unwrap_err().is_configuration());
        let s = spec(IsolationRequest::new("ssh").with(LevelOption::Endpoint, "me@box")).unwrap();
        assert_eq!(s.levels()[0].endpoint.as_deref(), Some("me@box"));
    }

    #[test]
    fn test_user_not_allowed_in_containers() {
        let err = spec(IsolationRequest::new("docker").with(LevelOption::User, "alice"))
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(spec(IsolationRequest::new("screen").with(LevelOption::User, "bad name!"))
            .is_err());
    }

    #[test]
    fn test_residual_and_request_encoding() {
        let original = spec(
            IsolationRequest::new("screen docker ssh")
                .with(LevelOption::Image, "_ alpine _")
                .with(LevelOption::Endpoint, "me@box")
                .with(LevelOption::Session, "s1 s2 s3"),
        )
        .unwrap();

        let (first, residual) = original.split_first();
        assert_eq!(first.backend, Backend::Screen);
        assert_eq!(first.session.as_deref(), Some("s1"));

        let residual = residual.unwrap();
        assert_eq!(residual.to_string(), "docker ssh");
        let decoded = IsolationSpec::from_request(&residual.to_request()).unwrap();
        assert_eq!(decoded, residual);

        let (_, last) = decoded.split_first();
        let last = last.unwrap();
        assert_eq!(IsolationSpec::from_request(&last.to_request()).unwrap(), last);
        assert!(last.split_first().1.is_none());
    }
}
