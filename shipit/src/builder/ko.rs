use log::info;

use super::{first_digest, Artifact, DigestError, NativeBuildArgs, NativeBuilder, PublishArgs, Publisher};
use crate::{output::Output, process, registry::Credentials, Result};

/// Native builds with `ko`, written to an OCI layout and pushed with `crane`.
pub struct Ko {
    output: Output,
}

impl Ko {
    pub fn new(output: Output) -> Self {
        Self { output }
    }
}

/// Partial implementation of the `index.json` of an OCI image layout.
/// See https://github.com/opencontainers/image-spec/blob/main/image-layout.md#indexjson-file.
#[derive(serde::Deserialize)]
struct LayoutIndex {
    #[serde(default)]
    manifests: Vec<LayoutDescriptor>,
}

#[derive(serde::Deserialize)]
struct LayoutDescriptor {
    digest: Option<String>,
}

fn layout_digest(index_json: &[u8]) -> Result<String, DigestError> {
    let index: LayoutIndex = serde_json::from_slice(index_json)?;
    first_digest(
        index
            .manifests
            .into_iter()
            .map(|descriptor| descriptor.digest),
    )
}

impl NativeBuilder for Ko {
    fn build(&self, args: NativeBuildArgs) -> Result<Artifact> {
        // Owns the directory from here on so a failed build does not leave it behind.
        let artifact = Artifact::new(tempfile::Builder::new().prefix("shipit-ko-").tempdir()?);
        let layout = artifact.layout();

        self.output.run(
            process::command!(
                "ko",
                "build",
                args.source,
                format!("--platform={}", args.platform),
                "--sbom=none",
                "--bare",
                "--push=false",
                format!("--oci-layout-path={}", layout.display()),
            )
            .env("KO_DOCKER_REPO", args.repository.as_str())
            .env("KO_DEFAULTBASEIMAGE", args.base_image.as_str()),
        )?;

        Ok(artifact)
    }

    fn digest(&self, artifact: &Artifact) -> Result<String> {
        let index = std::fs::read(artifact.layout().join("index.json"))?;
        Ok(layout_digest(&index)?)
    }
}

impl Publisher for Ko {
    fn login(&self, host: &str, credentials: &Credentials) -> Result<()> {
        info!("Logging crane into {host} as {}", credentials.username);
        self.output.capture_with_input(
            process::command!(
                "crane",
                "auth",
                "login",
                host,
                "--username",
                &credentials.username,
                "--password-stdin",
            ),
            credentials.password.clone().into_bytes(),
        )?;
        Ok(())
    }

    fn publish(&self, artifact: &Artifact, args: PublishArgs) -> Result<()> {
        let (first, rest) = args
            .tags
            .split_first()
            .ok_or("at least one tag is required to publish an image")?;

        let tagged = args.repository.to_builder().with_tag(first.as_str()).build()?;
        self.output.run(process::command!(
            "crane",
            "push",
            artifact.layout(),
            tagged.as_str()
        ))?;
        for tag in rest {
            self.output
                .run(process::command!("crane", "tag", tagged.as_str(), tag))?;
        }
        info!("published {tagged}");
        Ok(())
    }
}
