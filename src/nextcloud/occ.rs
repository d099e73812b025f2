use derive_more::{Display, Error, From};

use crate::api::{ClusterApi, ClusterError};

/// Prefix running `occ` as the web server user inside the Nextcloud pod.
const OCC_CMD: &str = "runuser -u www-data -- php occ";

const MAINTENANCE_ENABLED_REPLY: &str = "Maintenance mode enabled\n";
const MAINTENANCE_DISABLED_REPLY: &str = "Maintenance mode disabled\n";

#[derive(Debug, Display, Error, From)]
/// Errors of `occ` invocations.
pub enum OccError {
    /// Running `occ` in the pod failed.
    #[display("Executing occ failed: {_0}")]
    Exec(ClusterError),
    /// `occ` answered something other than expected.
    #[display("occ {command} replied {output:?} instead of {expected:?}")]
    #[from(ignore)]
    UnexpectedOutput {
        command: String,
        expected: &'static str,
        output: String,
    },
}

/// Interaction with the Nextcloud instance using the [`occ` command] inside its pod.
///
/// [`occ` command]: https://docs.nextcloud.com/server/latest/admin_manual/occ_command.html
#[derive(Clone)]
pub struct Occ<'a> {
    cluster: &'a dyn ClusterApi,
    /// Label selector of the Nextcloud pod.
    pod_label: String,
}

impl<'a> Occ<'a> {
    pub fn new(cluster: &'a dyn ClusterApi, app_name: &str) -> Self {
        Self {
            cluster,
            pod_label: format!("app={app_name}"),
        }
    }

    fn execute_command(&self, command: &str, args: &[&str]) -> Result<String, OccError> {
        let mut occ_command = format!("{OCC_CMD} {command}");
        for arg in args {
            occ_command.push(' ');
            occ_command.push_str(arg);
        }
        log::trace!(target: "nextcloud::occ", "Running: {occ_command}");

        Ok(self.cluster.exec_by_label(&self.pod_label, &occ_command)?)
    }

    /// Runs `occ` and requires its output to be exactly `expected`.
    fn expect_reply(
        &self,
        command: &str,
        args: &[&str],
        expected: &'static str,
    ) -> Result<(), OccError> {
        let output = self.execute_command(command, args)?;
        if output != expected {
            return Err(OccError::UnexpectedOutput {
                command: std::iter::once(command)
                    .chain(args.iter().copied())
                    .collect::<Vec<_>>()
                    .join(" "),
                expected,
                output,
            });
        }
        Ok(())
    }

    pub fn enable_maintenance(&self) -> Result<(), OccError> {
        self.expect_reply("maintenance:mode", &["--on"], MAINTENANCE_ENABLED_REPLY)?;
        log::debug!(target: "nextcloud::occ", "Maintenance Mode enabled.");
        Ok(())
    }

    pub fn disable_maintenance(&self) -> Result<(), OccError> {
        self.expect_reply("maintenance:mode", &["--off"], MAINTENANCE_DISABLED_REPLY)?;
        log::debug!(target: "nextcloud::occ", "Maintenance Mode disabled.");
        Ok(())
    }
}
