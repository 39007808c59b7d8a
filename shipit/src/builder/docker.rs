use image_ref::ImageRef;
use log::debug;

use super::{first_digest, DigestError, ExternalBuildArgs, ExternalBuilder};
use crate::{output::Output, process, Result};

/// External builds through `docker buildx`, pushing straight to the registry.
pub struct Docker {
    /// The docker context to run builds in, e.g. a remote builder machine.
    context: Option<String>,
    output: Output,
}

impl Docker {
    pub fn new(context: Option<String>, output: Output) -> Self {
        Self { context, output }
    }

    fn docker(&self) -> process::Command {
        let command = process::command!("docker");
        match &self.context {
            Some(context) => process::args!(command, "--context", context),
            None => command,
        }
    }

    fn build_command(&self, args: &ExternalBuildArgs) -> process::Command {
        let mut command = process::args!(
            self.docker(),
            "buildx",
            "build",
            "--output",
            "type=registry",
            format!("--platform={}", args.platform),
            "--progress=plain",
        )
        .env("DOCKER_BUILDKIT", "1");

        if let Some(target) = args.target {
            command = process::args!(command, "--target", target);
        }
        for tag in args.tags {
            command = process::args!(command, "-t", format!("{}:{tag}", args.repository));
        }
        if let Some(cache) = args.cache {
            command = process::args!(
                command,
                "--cache-from",
                format!("type=registry,ref={cache}"),
                "--cache-to",
                format!("type=registry,ref={cache},mode=max"),
            );
        }
        process::args!(command, "-f", args.build_file, args.context)
    }
}

impl ExternalBuilder for Docker {
    fn build_and_push(&self, args: ExternalBuildArgs) -> Result<()> {
        self.output.run(self.build_command(&args))?;
        Ok(())
    }

    fn digest(&self, image: &ImageRef) -> Result<String> {
        let output = self.output.capture(process::args!(
            self.docker(),
            "manifest",
            "inspect",
            "--verbose",
            image.as_str(),
        ))?;
        let digest = parse_manifest_digest(&output.stdout).inspect_err(|_| {
            self.output.append(&output.stdout);
        })?;
        debug!("{image} has digest {digest}");
        Ok(digest)
    }
}

/// Partial implementation of the JSON emitted by `docker manifest inspect --verbose`.
#[derive(serde::Deserialize)]
struct InspectedManifest {
    #[serde(rename = "Descriptor")]
    descriptor: Descriptor,
}

#[derive(serde::Deserialize)]
struct Descriptor {
    digest: Option<String>,
}

/// A list for multi-platform images, a single object otherwise.
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum Inspected {
    Many(Vec<InspectedManifest>),
    One(InspectedManifest),
}

/// Takes the digest of the first descriptor `docker manifest inspect --verbose` reports.
pub fn parse_manifest_digest(json: &[u8]) -> Result<String, DigestError> {
    let manifests = match serde_json::from_slice(json)? {
        Inspected::Many(manifests) => manifests,
        Inspected::One(manifest) => vec![manifest],
    };
    first_digest(
        manifests
            .into_iter()
            .map(|manifest| manifest.descriptor.digest),
    )
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    const DIGEST: &str = "sha256:5b0bcabd1ed22e9fb1310cf6c2dec7cdef19f0ad69efa1f392e94a4333501270";

    fn args<'a>(
        repository: &'a ImageRef,
        tags: &'a [String],
        target: Option<&'a str>,
        cache: Option<&'a ImageRef>,
    ) -> ExternalBuildArgs<'a> {
        ExternalBuildArgs {
            repository,
            build_file: Path::new("services/Dockerfile"),
            context: Path::new("."),
            target,
            tags,
            cache,
            platform: crate::builder::PLATFORM,
        }
    }

    #[test]
    fn build_command_pushes_every_tag() {
        let docker = Docker::new(None, Output::new(false));
        let repository = ImageRef::parse("reg.io/staging/web").unwrap();
        let tags = ["latest".to_owned(), "v1".to_owned()];
        let command = docker.build_command(&args(&repository, &tags, Some("web"), None));

        assert_eq!(command.program(), "docker");
        assert_eq!(
            command.get_args(),
            [
                "buildx",
                "build",
                "--output",
                "type=registry",
                "--platform=linux/amd64",
                "--progress=plain",
                "--target",
                "web",
                "-t",
                "reg.io/staging/web:latest",
                "-t",
                "reg.io/staging/web:v1",
                "-f",
                "services/Dockerfile",
                ".",
            ]
        );
    }

    #[test]
    fn build_command_uses_context_and_cache() {
        let docker = Docker::new(Some("remote-builder".to_owned()), Output::new(false));
        let repository = ImageRef::parse("reg.io/web").unwrap();
        let cache = ImageRef::parse("reg.io/build-cache:web-worker").unwrap();
        let tags = ["latest".to_owned()];
        let command = docker.build_command(&args(&repository, &tags, None, Some(&cache)));

        let args = command.get_args();
        assert_eq!(&args[..2], ["--context", "remote-builder"]);
        assert!(!args.contains(&"--target".to_owned()));
        let cache_from = args.iter().position(|arg| arg == "--cache-from").unwrap();
        assert_eq!(
            args[cache_from + 1],
            "type=registry,ref=reg.io/build-cache:web-worker"
        );
        assert_eq!(args[cache_from + 2], "--cache-to");
        assert_eq!(
            args[cache_from + 3],
            "type=registry,ref=reg.io/build-cache:web-worker,mode=max"
        );
    }

    #[test]
    fn parses_descriptor_list() {
        let json = format!(
            r#"[{{"Ref":"reg.io/web:latest","Descriptor":{{"mediaType":"application/vnd.oci.image.manifest.v1+json","digest":"{DIGEST}","size":1}}}},
                {{"Ref":"reg.io/web:latest","Descriptor":{{"digest":"sha256:other"}}}}]"#
        );
        assert_eq!(parse_manifest_digest(json.as_bytes()).unwrap(), DIGEST);
    }

    #[test]
    fn parses_single_descriptor() {
        let json = format!(r#"{{"Ref":"reg.io/web:latest","Descriptor":{{"digest":"{DIGEST}"}}}}"#);
        assert_eq!(parse_manifest_digest(json.as_bytes()).unwrap(), DIGEST);
    }

    #[test]
    fn empty_descriptor_list_is_an_error() {
        assert!(matches!(
            parse_manifest_digest(b"[]"),
            Err(DigestError::NoDescriptors)
        ));
        assert!(matches!(
            parse_manifest_digest(b"not json"),
            Err(DigestError::Parse(_))
        ));
        assert!(matches!(
            parse_manifest_digest(br#"[{"Descriptor":{}}]"#),
            Err(DigestError::MissingDigest)
        ));
    }
}
