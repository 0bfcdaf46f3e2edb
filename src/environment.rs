use crate::storage::InputValueSet;
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

/// Builds the environment a user command runs with.
///
/// The inherited environment is filtered, the user identity variables are
/// pinned, and caller overrides are applied last so they win over both.
#[derive(Debug, Clone)]
pub struct EnvironmentBuilder {
    strip: Vec<String>,
    home: PathBuf,
    uid: Option<u32>,
}

impl EnvironmentBuilder {
    pub fn new(strip: Vec<String>, home: impl Into<PathBuf>) -> Self {
        Self {
            strip,
            home: home.into(),
            uid: current_uid(),
        }
    }

    #[cfg(test)]
    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Names and values are kept as `OsString`, so inherited variables that
    /// are not valid UTF-8 pass through unchanged.
    pub fn build<I, K, V>(
        &self,
        base: I,
        overrides: Option<&InputValueSet>,
    ) -> BTreeMap<OsString, OsString>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        let mut env: BTreeMap<OsString, OsString> = base
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .filter(|(key, _)| !self.is_stripped(key))
            .collect();

        env.insert("HOME".into(), self.home.clone().into_os_string());
        env.insert("PWD".into(), self.home.clone().into_os_string());
        if let Some(uid) = self.uid {
            env.insert("XDG_RUNTIME_DIR".into(), format!("/run/user/{}", uid).into());
        }

        if let Some(overrides) = overrides {
            for (key, value) in overrides.iter() {
                env.insert(key.into(), value.to_env_string().into());
            }
        }

        env
    }

    /// Like [`build`](Self::build), starting from this process's environment.
    pub fn build_from_process(
        &self,
        overrides: Option<&InputValueSet>,
    ) -> BTreeMap<OsString, OsString> {
        self.build(std::env::vars_os(), overrides)
    }

    fn is_stripped(&self, key: &OsStr) -> bool {
        self.strip.iter().any(|s| OsStr::new(s) == key)
    }
}

#[cfg(unix)]
fn current_uid() -> Option<u32> {
    Some(nix::unistd::Uid::current().as_raw())
}

#[cfg(not(unix))]
fn current_uid() -> Option<u32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Vec<(String, String)> {
        vec![
            ("PATH".to_string(), "/usr/bin:/bin".to_string()),
            ("HOME".to_string(), "/root".to_string()),
            ("PWD".to_string(), "/opt/host".to_string()),
            ("LD_LIBRARY_PATH".to_string(), "/opt/host/lib".to_string()),
            ("LD_PRELOAD".to_string(), "/opt/host/hook.so".to_string()),
            ("XDG_RUNTIME_DIR".to_string(), "/run/user/0".to_string()),
        ]
    }

    fn var<'a>(env: &'a BTreeMap<OsString, OsString>, key: &str) -> Option<&'a str> {
        env.get(OsStr::new(key)).and_then(|v| v.to_str())
    }

    fn has(env: &BTreeMap<OsString, OsString>, key: &str) -> bool {
        env.contains_key(OsStr::new(key))
    }

    fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::new(
            vec!["LD_LIBRARY_PATH".to_string(), "LD_PRELOAD".to_string()],
            "/home/deck",
        )
        .with_uid(1000)
    }

    #[test]
    fn strips_host_library_variables() {
        let env = builder().build(base(), None);
        assert!(!has(&env, "LD_LIBRARY_PATH"));
        assert!(!has(&env, "LD_PRELOAD"));
        assert_eq!(var(&env, "PATH"), Some("/usr/bin:/bin"));
    }

    #[test]
    fn pins_user_identity_variables() {
        let env = builder().build(base(), None);
        assert_eq!(var(&env, "HOME"), Some("/home/deck"));
        assert_eq!(var(&env, "PWD"), Some("/home/deck"));
        assert_eq!(var(&env, "XDG_RUNTIME_DIR"), Some("/run/user/1000"));
    }

    #[test]
    fn overrides_apply_after_sanitizing() {
        let mut overrides = InputValueSet::new();
        overrides.insert("FLAG", true);
        overrides.insert("OFF", false);
        overrides.insert("COUNT", 7i64);
        overrides.insert("HOME", "/tmp/elsewhere");
        overrides.insert("LD_PRELOAD", "/opt/wanted.so");

        let env = builder().build(base(), Some(&overrides));
        assert_eq!(var(&env, "FLAG"), Some("1"));
        assert_eq!(var(&env, "OFF"), Some("0"));
        assert_eq!(var(&env, "COUNT"), Some("7"));
        assert_eq!(var(&env, "HOME"), Some("/tmp/elsewhere"));
        // An explicit override is the only way a stripped variable comes back.
        assert_eq!(var(&env, "LD_PRELOAD"), Some("/opt/wanted.so"));
        assert!(!has(&env, "LD_LIBRARY_PATH"));
    }

    #[test]
    fn strip_list_is_configurable() {
        let builder = EnvironmentBuilder::new(vec!["PATH".to_string()], "/home/deck");
        let env = builder.build(base(), None);
        assert!(!has(&env, "PATH"));
        assert!(has(&env, "LD_PRELOAD"));
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_variables_are_inherited() {
        use std::os::unix::ffi::OsStrExt;

        let latin1 = OsStr::from_bytes(b"caf\xe9");
        std::env::set_var("EXEKAWAII_TEST_LATIN1", latin1);
        let env = builder().build_from_process(None);
        std::env::remove_var("EXEKAWAII_TEST_LATIN1");

        assert_eq!(
            env.get(OsStr::new("EXEKAWAII_TEST_LATIN1")).map(OsString::as_os_str),
            Some(latin1)
        );
        assert_eq!(var(&env, "HOME"), Some("/home/deck"));
    }
}
