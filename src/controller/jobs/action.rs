//! # Lifecycle Actions
//!
//! Each action is an `init` followed by one verb, run non-interactively without color.

use std::fmt;

const INIT_COMMAND: &str = "tofu init -no-color -input=false";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Apply,
    Destroy,
    Plan,
}

impl Action {
    pub const ALL: [Action; 3] = [Action::Apply, Action::Destroy, Action::Plan];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Apply => "apply",
            Action::Destroy => "destroy",
            Action::Plan => "plan",
        }
    }

    /// The two CLI invocations this action runs, in order
    #[must_use]
    pub fn commands(self) -> [&'static str; 2] {
        let verb = match self {
            Action::Apply => "tofu apply -no-color -auto-approve -input=false",
            Action::Destroy => "tofu destroy -no-color -auto-approve -input=false",
            Action::Plan => "tofu plan -no-color -input=false",
        };
        [INIT_COMMAND, verb]
    }

    /// Script passed to `sh -c` in the main container
    #[must_use]
    pub fn script(self) -> String {
        self.commands().join(" && ")
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic job name for a workspace and action
///
/// Callers rediscover in-flight jobs through this name alone, so it must never
/// depend on anything but its arguments.
#[must_use]
pub fn job_name(workspace: &str, action: Action) -> String {
    format!("{workspace}-opentofu-{action}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_name_is_deterministic() {
        assert_eq!(job_name("network", Action::Apply), "network-opentofu-apply");
        assert_eq!(job_name("network", Action::Destroy), "network-opentofu-destroy");
        assert_eq!(job_name("network", Action::Plan), "network-opentofu-plan");
        assert_eq!(
            job_name("network", Action::Plan),
            job_name("network", Action::Plan)
        );
    }

    #[test]
    fn test_scripts_run_init_first() {
        assert_eq!(
            Action::Apply.script(),
            "tofu init -no-color -input=false && tofu apply -no-color -auto-approve -input=false"
        );
        assert_eq!(
            Action::Destroy.script(),
            "tofu init -no-color -input=false && tofu destroy -no-color -auto-approve -input=false"
        );
        assert_eq!(
            Action::Plan.script(),
            "tofu init -no-color -input=false && tofu plan -no-color -input=false"
        );
    }
}
