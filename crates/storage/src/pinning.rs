//! The pinning-service CLI adapter.
//!
//! Every subcommand has an explicit output grammar; a stdout line that
//! matches no production of its subcommand's grammar fails the whole call.
//! Nothing the tool prints is silently ignored.

use async_trait::async_trait;
use renderhive_api::storage::{Did, PinningProvider, SpaceInfo, UploadRecord};
use renderhive_types::app::Cid;
use renderhive_types::error::NetworkError;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Drives the pinning agent through its command-line interface.
pub struct PinningCli {
    program: PathBuf,
}

impl PinningCli {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }

    async fn run(&self, args: &[&str]) -> Result<String, NetworkError> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                NetworkError::Pinning(format!("spawn {}: {e}", self.program.display()))
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NetworkError::Pinning(format!(
                "`{}` exited with {}: {}",
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

// --- Output grammar -------------------------------------------------------
//
// Pure parsers, one per subcommand, so the grammar is testable without the
// CLI installed.

fn parse_did_token(token: &str) -> Option<Did> {
    token
        .starts_with("did:")
        .then(|| Did(token.to_owned()))
}

/// `whoami`: exactly one DID line.
pub(crate) fn parse_whoami(stdout: &str) -> Result<Did, NetworkError> {
    let mut found = None;
    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let did = parse_did_token(line)
            .ok_or_else(|| NetworkError::Pinning(format!("whoami: unexpected line `{line}`")))?;
        if found.replace(did).is_some() {
            return Err(NetworkError::Pinning("whoami: more than one DID line".into()));
        }
    }
    found.ok_or_else(|| NetworkError::Pinning("whoami: no DID in output".into()))
}

/// `space ls`: zero or more lines `[*] <did> [name…]`; `*` marks the
/// currently selected space.
pub(crate) fn parse_space_list(stdout: &str) -> Result<Vec<SpaceInfo>, NetworkError> {
    let mut spaces = Vec::new();
    for raw in stdout.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let (current, rest) = match line.strip_prefix('*') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, line),
        };
        let mut tokens = rest.split_whitespace();
        let did = tokens
            .next()
            .and_then(parse_did_token)
            .ok_or_else(|| NetworkError::Pinning(format!("space ls: unexpected line `{raw}`")))?;
        let name = tokens.collect::<Vec<_>>().join(" ");
        spaces.push(SpaceInfo { did, name, current });
    }
    Ok(spaces)
}

/// `space create` / `space add`: exactly one DID line for the new space.
pub(crate) fn parse_space_did(subcommand: &str, stdout: &str) -> Result<Did, NetworkError> {
    let mut found = None;
    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let did = parse_did_token(line).ok_or_else(|| {
            NetworkError::Pinning(format!("{subcommand}: unexpected line `{line}`"))
        })?;
        if found.replace(did).is_some() {
            return Err(NetworkError::Pinning(format!(
                "{subcommand}: more than one DID line"
            )));
        }
    }
    found.ok_or_else(|| NetworkError::Pinning(format!("{subcommand}: no DID in output")))
}

/// `ls --json` / `up --json`: one single-line JSON record per upload.
pub(crate) fn parse_upload_records(stdout: &str) -> Result<Vec<UploadRecord>, NetworkError> {
    let mut records = Vec::new();
    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let record: UploadRecord = serde_json::from_str(line)
            .map_err(|e| NetworkError::Pinning(format!("upload record `{line}`: {e}")))?;
        records.push(record);
    }
    Ok(records)
}

/// `rm`: silence, or lines echoing the removed CID.
pub(crate) fn parse_remove(cid: &Cid, stdout: &str) -> Result<(), NetworkError> {
    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if !line.contains(cid.as_str()) {
            return Err(NetworkError::Pinning(format!("rm: unexpected line `{line}`")));
        }
    }
    Ok(())
}

/// `delegation create`: non-empty base64url token lines forming the proof.
pub(crate) fn parse_delegation_proof(stdout: &str) -> Result<String, NetworkError> {
    let mut parts = Vec::new();
    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let token_like = line
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=' | '-' | '_'));
        if !token_like {
            return Err(NetworkError::Pinning(format!(
                "delegation create: unexpected line `{line}`"
            )));
        }
        parts.push(line);
    }
    if parts.is_empty() {
        return Err(NetworkError::Pinning("delegation create: empty proof".into()));
    }
    Ok(parts.concat())
}

/// `delegation ls` / `proof ls`: one entry per non-empty line, first token a
/// CID or DID.
pub(crate) fn parse_listing(subcommand: &str, stdout: &str) -> Result<Vec<String>, NetworkError> {
    let mut entries = Vec::new();
    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let first = line.split_whitespace().next().unwrap_or_default();
        if !(first.starts_with("did:") || first.starts_with("baf")) {
            return Err(NetworkError::Pinning(format!(
                "{subcommand}: unexpected line `{line}`"
            )));
        }
        entries.push(line.to_owned());
    }
    Ok(entries)
}

#[async_trait]
impl PinningProvider for PinningCli {
    async fn whoami(&self) -> Result<Did, NetworkError> {
        parse_whoami(&self.run(&["whoami"]).await?)
    }

    async fn space_list(&self) -> Result<Vec<SpaceInfo>, NetworkError> {
        parse_space_list(&self.run(&["space", "ls"]).await?)
    }

    async fn space_create(&self, name: &str) -> Result<Did, NetworkError> {
        parse_space_did("space create", &self.run(&["space", "create", name]).await?)
    }

    async fn space_add(&self, proof: &str) -> Result<Did, NetworkError> {
        parse_space_did("space add", &self.run(&["space", "add", proof]).await?)
    }

    async fn space_use(&self, did: &Did) -> Result<(), NetworkError> {
        parse_space_did("space use", &self.run(&["space", "use", &did.0]).await?).map(|_| ())
    }

    async fn upload_list(&self) -> Result<Vec<UploadRecord>, NetworkError> {
        // Listing requires a space; guard on one existing rather than
        // surfacing the CLI's less actionable failure.
        if self.space_list().await?.is_empty() {
            return Err(NetworkError::Pinning(
                "no space exists yet; create or add one first".into(),
            ));
        }
        parse_upload_records(&self.run(&["ls", "--json"]).await?)
    }

    async fn upload(&self, paths: &[PathBuf]) -> Result<UploadRecord, NetworkError> {
        let mut args = vec!["up".to_owned(), "--json".to_owned()];
        args.extend(paths.iter().map(|p| p.display().to_string()));
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let records = parse_upload_records(&self.run(&arg_refs).await?)?;
        records
            .into_iter()
            .next()
            .ok_or_else(|| NetworkError::Pinning("up: no upload record in output".into()))
    }

    async fn remove(&self, cid: &Cid) -> Result<(), NetworkError> {
        parse_remove(cid, &self.run(&["rm", cid.as_str()]).await?)
    }

    async fn delegation_create(&self, audience: &Did) -> Result<String, NetworkError> {
        parse_delegation_proof(
            &self
                .run(&["delegation", "create", &audience.0, "--base64"])
                .await?,
        )
    }

    async fn delegation_list(&self) -> Result<Vec<String>, NetworkError> {
        parse_listing("delegation ls", &self.run(&["delegation", "ls"]).await?)
    }

    async fn proof_add(&self, proof_path: &Path) -> Result<(), NetworkError> {
        let path = proof_path.display().to_string();
        parse_space_did("proof add", &self.run(&["proof", "add", &path]).await?).map(|_| ())
    }

    async fn proof_list(&self) -> Result<Vec<String>, NetworkError> {
        parse_listing("proof ls", &self.run(&["proof", "ls"]).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whoami_wants_exactly_one_did() {
        let did = parse_whoami("did:key:z6MkhaXgBZDvotDkL5257faiztiGiC2QtKLGpbnnEGta2doK\n").unwrap();
        assert!(did.0.starts_with("did:key:"));

        assert!(parse_whoami("").is_err());
        assert!(parse_whoami("not a did\n").is_err());
        assert!(parse_whoami("did:key:aaa\ndid:key:bbb\n").is_err());
    }

    #[test]
    fn space_list_grammar() {
        let out = "* did:key:z6MkspaceA alice-renders\n  did:key:z6MkspaceB backup\n";
        let spaces = parse_space_list(out).unwrap();
        assert_eq!(spaces.len(), 2);
        assert!(spaces[0].current);
        assert_eq!(spaces[0].name, "alice-renders");
        assert!(!spaces[1].current);
        assert_eq!(spaces[1].did.0, "did:key:z6MkspaceB");

        // An unknown line is an error, not ignored.
        assert!(parse_space_list("warning: please upgrade\n").is_err());
        // No spaces at all is a valid, empty listing.
        assert!(parse_space_list("\n").unwrap().is_empty());
    }

    #[test]
    fn upload_records_are_single_line_json() {
        let out = r#"{"root":"bafybeia","shards":["bagbaierab"]}
{"root":"bafybeib"}
"#;
        let records = parse_upload_records(out).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].root.as_str(), "bafybeia");
        assert_eq!(records[0].shards, vec!["bagbaierab"]);
        assert!(records[1].shards.is_empty());

        assert!(parse_upload_records("uploading...\n").is_err());
    }

    #[test]
    fn remove_accepts_silence_or_cid_echo() {
        let cid = Cid("bafybeia".into());
        assert!(parse_remove(&cid, "").is_ok());
        assert!(parse_remove(&cid, "removed bafybeia\n").is_ok());
        assert!(parse_remove(&cid, "some other noise\n").is_err());
    }

    #[test]
    fn delegation_proof_is_token_lines() {
        let proof = parse_delegation_proof("EaJlcm9vdHOAZ3ZlcnNpb24B\nmAYIEIaE=\n").unwrap();
        assert_eq!(proof, "EaJlcm9vdHOAZ3ZlcnNpb24BmAYIEIaE=");
        assert!(parse_delegation_proof("").is_err());
        assert!(parse_delegation_proof("error: no proof\n").is_err());
    }

    #[test]
    fn listings_demand_did_or_cid_leaders() {
        let entries =
            parse_listing("proof ls", "bafyreib123 storage/add\ndid:key:z6Mk via\n").unwrap();
        assert_eq!(entries.len(), 2);
        assert!(parse_listing("proof ls", "hello world\n").is_err());
    }
}
