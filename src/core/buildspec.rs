//! Build script generation for the CodeBuild projects.
//!
//! The buildspec has three phases:
//! - pre_build: ECR login and image tag derivation
//! - build: docker build with `latest` and commit tags
//! - post_build: push both tags and write the image-definitions manifest

use serde::{Deserialize, Serialize};
use serde_json::json;

/// One entry of the manifest the ECS deploy action consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDefinition {
    pub name: String,
    #[serde(rename = "imageUri")]
    pub image_uri: String,
}

/// Render the buildspec for a container image. `uri_var` names the build
/// environment variable holding the repository URI.
pub fn build_spec(container: &str, image_definitions_file: &str, uri_var: &str) -> String {
    let uri = format!("${}", uri_var);
    let spec = json!({
        "version": "0.2",
        "phases": {
            "pre_build": {
                "commands": [
                    "echo Logging in to Amazon ECR...",
                    format!("echo Repository URI: {}", uri),
                    "echo AWS Region: $AWS_DEFAULT_REGION",
                    format!(
                        "aws ecr get-login-password --region $AWS_DEFAULT_REGION | docker login --username AWS --password-stdin {} || exit 1",
                        uri
                    ),
                    "COMMIT_HASH=$(echo $CODEBUILD_RESOLVED_SOURCE_VERSION | cut -c 1-7)",
                    "IMAGE_TAG=${COMMIT_HASH:=latest}",
                    "echo IMAGE_TAG=$IMAGE_TAG",
                ]
            },
            "build": {
                "commands": [
                    "echo Build started on `date`",
                    format!("echo Building {} service...", container),
                    format!("docker build -t {uri}:latest -t {uri}:$IMAGE_TAG . || exit 1", uri = uri),
                ]
            },
            "post_build": {
                "commands": [
                    "echo Build completed on `date`",
                    format!("echo Pushing the Docker image to {}...", uri),
                    format!("docker push {}:latest || exit 1", uri),
                    format!("docker push {}:$IMAGE_TAG || exit 1", uri),
                    "echo Writing image definitions file...",
                    format!(
                        "printf {} {}:latest > {} || exit 1",
                        shell_quote(&manifest_format(container)),
                        uri,
                        image_definitions_file
                    ),
                ]
            }
        },
        "artifacts": {
            "files": [image_definitions_file]
        }
    });
    serde_json::to_string_pretty(&spec).unwrap_or_default()
}

/// `printf` format producing the manifest, with the image URI as `%s`.
fn manifest_format(container: &str) -> String {
    let name = serde_json::to_string(container)
        .unwrap_or_default()
        .replace('\\', "\\\\")
        .replace('%', "%%");
    format!("[{{\"name\":{},\"imageUri\":\"%s\"}}]", name)
}

/// Single-quote for `sh`.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Render the manifest the build writes. Byte-identical to what the
/// `printf` in the post_build phase produces.
pub fn image_definitions(container: &str, repository_uri: &str) -> String {
    let entries = [ImageDefinition {
        name: container.to_string(),
        image_uri: format!("{}:latest", repository_uri),
    }];
    serde_json::to_string(&entries).unwrap_or_default()
}

/// Parse a manifest back into its entries.
pub fn parse_image_definitions(manifest: &str) -> Result<Vec<ImageDefinition>, serde_json::Error> {
    serde_json::from_str(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn commands(spec: &Value, phase: &str) -> Vec<String> {
        spec["phases"][phase]["commands"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c.as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_buildspec_phases() {
        let raw = build_spec("gara-image-container", "defs.json", "ECR_REPOSITORY_URI");
        let spec: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(spec["version"], "0.2");
        assert_eq!(spec["artifacts"]["files"][0], "defs.json");

        let pre = commands(&spec, "pre_build");
        assert!(pre.iter().any(|c| c.contains("docker login") && c.ends_with("|| exit 1")));
        assert!(pre.contains(&"IMAGE_TAG=${COMMIT_HASH:=latest}".to_string()));

        let build = commands(&spec, "build");
        assert!(build.contains(
            &"docker build -t $ECR_REPOSITORY_URI:latest -t $ECR_REPOSITORY_URI:$IMAGE_TAG . || exit 1"
                .to_string()
        ));
    }

    #[test]
    fn test_buildspec_failing_commands_exit() {
        let raw = build_spec("c", "f.json", "FRONTEND_ECR_REPOSITORY_URI");
        let spec: Value = serde_json::from_str(&raw).unwrap();
        for cmd in commands(&spec, "post_build") {
            if cmd.starts_with("docker") || cmd.starts_with("printf") {
                assert!(cmd.ends_with("|| exit 1"), "{}", cmd);
            }
        }
        assert!(raw.contains("$FRONTEND_ECR_REPOSITORY_URI:latest"));
    }

    #[test]
    fn test_buildspec_manifest_exact() {
        let m = image_definitions("gara-image-container", "123.dkr.ecr.us-east-1.amazonaws.com/repo");
        assert_eq!(
            m,
            r#"[{"name":"gara-image-container","imageUri":"123.dkr.ecr.us-east-1.amazonaws.com/repo:latest"}]"#
        );
        let parsed = parse_image_definitions(&m).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, "gara-image-container");
        assert!(parsed[0].image_uri.ends_with(":latest"));
    }

    #[test]
    fn test_buildspec_printf_matches_manifest_shape() {
        let raw = build_spec("web", "d.json", "URI");
        let spec: Value = serde_json::from_str(&raw).unwrap();
        let printf = commands(&spec, "post_build")
            .into_iter()
            .find(|c| c.starts_with("printf"))
            .unwrap();
        // Substitute the %s the shell would fill in
        let rendered = printf
            .trim_start_matches("printf '")
            .split('\'')
            .next()
            .unwrap()
            .replace("%s", "registry/repo:latest");
        assert_eq!(rendered, image_definitions("web", "registry/repo"));
    }

    /// What `sh` then `printf` make of the manifest command.
    fn run_printf(cmd: &str, arg: &str) -> String {
        let quoted = cmd
            .trim_start_matches("printf ")
            .rsplit_once(" $")
            .unwrap()
            .0;
        let format = quoted[1..quoted.len() - 1].replace("'\\''", "'");
        let mut out = String::new();
        let mut chars = format.chars();
        while let Some(c) = chars.next() {
            match c {
                '%' => match chars.next() {
                    Some('s') => out.push_str(arg),
                    Some(other) => out.push(other),
                    None => {}
                },
                '\\' => out.extend(chars.next()),
                other => out.push(other),
            }
        }
        out
    }

    #[test]
    fn test_buildspec_manifest_escapes_container_name() {
        let container = "we\"b's 100%\\";
        let m = image_definitions(container, "r/x");
        let parsed = parse_image_definitions(&m).unwrap();
        assert_eq!(parsed[0].name, container);
        assert_eq!(parsed[0].image_uri, "r/x:latest");

        let raw = build_spec(container, "d.json", "URI");
        let spec: Value = serde_json::from_str(&raw).unwrap();
        let printf = commands(&spec, "post_build")
            .into_iter()
            .find(|c| c.starts_with("printf"))
            .unwrap();
        assert_eq!(run_printf(&printf, "r/x:latest"), m);
    }
}
