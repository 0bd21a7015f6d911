use std::fmt;
use std::str::FromStr;

use crate::errors::Error;

/// Connection name of a managed database instance.
///
/// Parsed from `<PROJECT>:<REGION>:<INSTANCE>`. Legacy domain-scoped projects
/// carry one embedded colon (`example.com:project`), so a four-part name folds
/// its first two components into the project.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceName {
    project: String,
    region: String,
    instance: String,
}

impl InstanceName {
    /// Project the instance belongs to (may contain one colon for
    /// domain-scoped legacy projects).
    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Region the instance runs in.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Bare instance identifier.
    #[must_use]
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Resource path segment used by the admin API: `<region>~<instance>`.
    #[must_use]
    pub fn regionalized(&self) -> String {
        format!("{}~{}", self.region, self.instance)
    }
}

impl FromStr for InstanceName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.iter().any(|part| part.is_empty()) {
            return Err(Error::InvalidName { name: s.to_owned() });
        }

        let (project, region, instance) = match parts.as_slice() {
            [project, region, instance] => {
                ((*project).to_owned(), (*region).to_owned(), (*instance).to_owned())
            }
            [domain, project, region, instance] => (
                format!("{domain}:{project}"),
                (*region).to_owned(),
                (*instance).to_owned(),
            ),
            _ => return Err(Error::InvalidName { name: s.to_owned() }),
        };

        Ok(Self {
            project,
            region,
            instance,
        })
    }
}

impl fmt::Display for InstanceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.project, self.region, self.instance)
    }
}
