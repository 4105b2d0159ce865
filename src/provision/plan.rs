//! Install plan shared by dry runs and real runs
//!
//! A dry run renders the plan; a real run executes the same steps. The
//! rendered line also spells out what the provisioner does in-process
//! (checksum, fragment directory, root export) so it works when pasted
//! into a shell.

use super::fragment::root_export_line;
use super::runner::{shell_quote, CommandSpec};
use std::path::{Path, PathBuf};

/// Ordered provisioning steps for one install target
#[derive(Debug, Clone)]
pub struct InstallPlan {
    pub installer_url: String,
    /// Final installer location, next to the target
    pub installer_path: PathBuf,
    /// Download destination until the transfer is complete and verified
    pub partial_path: PathBuf,
    pub target: PathBuf,
    pub manifest_path: PathBuf,
    pub env_name: String,
    pub fragment_path: PathBuf,
    /// Expected installer digest, lowercase hex
    pub installer_sha256: Option<String>,
}

impl InstallPlan {
    pub fn new(
        installer_url: &str,
        installer_file_name: &str,
        target: &Path,
        manifest_path: &Path,
        env_name: &str,
        fragment_path: &Path,
    ) -> Self {
        let staging = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let installer_path = staging.join(installer_file_name);
        let partial_path = staging.join(format!("{}.part", installer_file_name));

        Self {
            installer_url: installer_url.to_string(),
            installer_path,
            partial_path,
            target: target.to_path_buf(),
            manifest_path: manifest_path.to_path_buf(),
            env_name: env_name.to_string(),
            fragment_path: fragment_path.to_path_buf(),
            installer_sha256: None,
        }
    }

    pub fn with_checksum(mut self, sha256: Option<&str>) -> Self {
        self.installer_sha256 = sha256.map(str::to_lowercase);
        self
    }

    pub fn conda(&self) -> PathBuf {
        self.target.join("bin").join("conda")
    }

    /// Prefix the named environment is created under.
    pub fn env_prefix(&self) -> PathBuf {
        self.target.join("envs").join(&self.env_name)
    }

    pub fn condarc(&self) -> PathBuf {
        self.target.join(".condarc")
    }

    /// Non-interactive batch install into the target.
    pub fn install_step(&self) -> CommandSpec {
        CommandSpec::new("bash")
            .arg(self.installer_path.to_string_lossy())
            .arg("-b")
            .arg("-p")
            .arg(self.target.to_string_lossy())
    }

    /// Keeps the base environment inert so shared users do not clash.
    pub fn configure_step(&self) -> CommandSpec {
        CommandSpec::new(self.conda())
            .arg("config")
            .arg("--file")
            .arg(self.condarc().to_string_lossy())
            .arg("--set")
            .arg("auto_activate_base")
            .arg("false")
    }

    pub fn create_env_step(&self) -> CommandSpec {
        CommandSpec::new(self.conda())
            .arg("env")
            .arg("create")
            .arg("--file")
            .arg(self.manifest_path.to_string_lossy())
            .arg("--name")
            .arg(&self.env_name)
    }

    pub fn hook_step(&self) -> CommandSpec {
        CommandSpec::new(self.conda()).arg("shell.bash").arg("hook")
    }

    /// The whole plan as one shell command line.
    pub fn render(&self) -> String {
        let installer = shell_quote(&self.installer_path.to_string_lossy());
        let fragment = shell_quote(&self.fragment_path.to_string_lossy());
        let fragment_dir = self
            .fragment_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut steps = vec![format!(
            "curl -fsSL {} -o {}",
            shell_quote(&self.installer_url),
            installer
        )];
        if let Some(ref digest) = self.installer_sha256 {
            steps.push(format!(
                "printf '%s  %s\\n' {} {} | sha256sum -c -",
                digest, installer
            ));
        }
        steps.extend([
            self.install_step().to_shell_line(),
            self.configure_step().to_shell_line(),
            self.create_env_step().to_shell_line(),
            format!("mkdir -p {}", shell_quote(&fragment_dir.to_string_lossy())),
            format!(
                "{} | grep -v -e '^[[:space:]]*#' -e '^[[:space:]]*$' > {}",
                self.hook_step(),
                fragment
            ),
            format!(
                "echo {} >> {}",
                shell_quote(&root_export_line(&self.target)),
                fragment
            ),
            format!("rm -f {}", installer),
        ]);
        steps.join(" && ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(target: &str) -> InstallPlan {
        InstallPlan::new(
            "https://repo.anaconda.com/miniconda/Miniconda3-latest-Linux-x86_64.sh",
            "Miniconda3-latest-Linux-x86_64.sh",
            Path::new(target),
            Path::new("/cluster/share/environment.yml"),
            "fermi",
            Path::new("/cluster/share/conda_init.sh"),
        )
    }

    #[test]
    fn test_installer_staged_next_to_target() {
        let plan = plan("/cluster/alice/conda");
        assert_eq!(
            plan.installer_path,
            PathBuf::from("/cluster/alice/Miniconda3-latest-Linux-x86_64.sh")
        );
        assert_eq!(
            plan.partial_path,
            PathBuf::from("/cluster/alice/Miniconda3-latest-Linux-x86_64.sh.part")
        );
        assert_eq!(plan.env_prefix(), PathBuf::from("/cluster/alice/conda/envs/fermi"));
    }

    #[test]
    fn test_install_step_is_batch_mode() {
        let line = plan("/cluster/alice/conda").install_step().to_shell_line();
        assert_eq!(
            line,
            "bash /cluster/alice/Miniconda3-latest-Linux-x86_64.sh -b -p /cluster/alice/conda"
        );
    }

    #[test]
    fn test_render_contains_every_step_in_order() {
        let rendered = plan("/cluster/alice/conda").render();
        let positions: Vec<usize> = [
            "curl -fsSL",
            "bash /cluster/alice/",
            "config --file /cluster/alice/conda/.condarc --set auto_activate_base false",
            "env create --file /cluster/share/environment.yml --name fermi",
            "mkdir -p /cluster/share",
            "shell.bash hook",
            "echo 'export GAMMAPIPE_CONDA_ROOT=/cluster/alice/conda' >> /cluster/share/conda_init.sh",
            "rm -f",
        ]
        .iter()
        .map(|needle| rendered.find(needle).unwrap_or_else(|| panic!("missing {}", needle)))
        .collect();

        let mut sorted = positions.clone();
        sorted.sort_unstable();
        assert_eq!(positions, sorted);
        assert!(!rendered.contains("sha256sum"));
    }

    #[test]
    fn test_render_verifies_checksum_before_install() {
        let digest = "ab".repeat(32);
        let rendered = plan("/cluster/alice/conda")
            .with_checksum(Some(&digest))
            .render();

        let check = format!(
            r"printf '%s  %s\n' {} /cluster/alice/Miniconda3-latest-Linux-x86_64.sh | sha256sum -c -",
            digest
        );
        let check_at = rendered.find(&check).expect("checksum step");
        assert!(check_at > rendered.find("curl -fsSL").unwrap());
        assert!(check_at < rendered.find("bash /cluster/alice/").unwrap());
    }

    #[test]
    fn test_render_creates_fragment_dir_inside_target() {
        let plan = InstallPlan::new(
            "https://example.org/inst.sh",
            "inst.sh",
            Path::new("/opt/my conda"),
            Path::new("env.yml"),
            "fermi",
            Path::new("/opt/my conda/etc/gammapipe/conda_init.sh"),
        );
        let rendered = plan.render();

        let mkdir_at = rendered
            .find("mkdir -p '/opt/my conda/etc/gammapipe'")
            .expect("mkdir step");
        assert!(mkdir_at < rendered.find("shell.bash hook").unwrap());
        assert!(rendered.contains(
            r#"echo 'export GAMMAPIPE_CONDA_ROOT='\''/opt/my conda'\''' >> '/opt/my conda/etc/gammapipe/conda_init.sh'"#
        ));
    }

    #[test]
    fn test_relative_target_stages_in_current_dir() {
        let plan = plan("conda");
        assert_eq!(
            plan.installer_path,
            PathBuf::from("./Miniconda3-latest-Linux-x86_64.sh")
        );
    }
}
