//! nftables engine implementation.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use super::{nft_path, FilterEngine, SetRef};
use crate::cmd_abstraction::CommandExecutor;
use crate::error::BlocksyncError;
use crate::prefix::NetworkPrefix;
use crate::rules::EnforcementRule;

/// Set declaration with the auto-merge hint
const SET_SPEC_AUTO_MERGE: &str = "{ type ipv4_addr ; flags interval ; auto-merge ; }";
/// Set declaration for engines without auto-merge support
const SET_SPEC_PLAIN: &str = "{ type ipv4_addr ; flags interval ; }";

/// Validate that an element is safe to splice into an nft command line.
/// `NetworkPrefix` display output always passes; this guards the boundary.
fn is_safe_nft_element(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '/')
}

/// Whether nft stderr reports a missing table, chain or set.
fn is_missing_object(stderr: &str) -> bool {
    stderr.contains("No such file or directory") || stderr.contains("does not exist")
}

/// nftables engine driving `nft` through a [`CommandExecutor`].
pub struct NftablesEngine<E: CommandExecutor> {
    executor: E,
    set_ref: SetRef,
}

impl<E: CommandExecutor> NftablesEngine<E> {
    pub fn new(executor: E, set_ref: SetRef) -> Self {
        Self { executor, set_ref }
    }

    /// Run nft, mapping a non-zero exit to an error carrying stderr.
    fn nft(&self, args: Vec<String>) -> Result<String> {
        debug!("nft {}", args.join(" "));
        let output = self.executor.execute(nft_path(), &args)?;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(BlocksyncError::Firewall(format!(
                "nft {} failed: {}",
                args.first().map(String::as_str).unwrap_or_default(),
                output.stderr.trim()
            ))
            .into())
        }
    }

    /// `<verb> <object> <family> <table>` prefix shared by all commands
    fn base_args(&self, verb: &str, object: &str) -> Vec<String> {
        vec![
            verb.to_string(),
            object.to_string(),
            self.set_ref.family.clone(),
            self.set_ref.table.clone(),
        ]
    }

    fn element_block(elements: &[NetworkPrefix]) -> Result<String> {
        let rendered: Vec<String> = elements.iter().map(NetworkPrefix::set_element).collect();
        if let Some(bad) = rendered.iter().find(|s| !is_safe_nft_element(s)) {
            warn!("Refusing unsafe nftables element: {}", bad);
            anyhow::bail!("unsafe nftables element: {}", bad);
        }
        Ok(format!("{{ {} }}", rendered.join(", ")))
    }
}

#[async_trait]
impl<E: CommandExecutor> FilterEngine for NftablesEngine<E> {
    fn set_ref(&self) -> &SetRef {
        &self.set_ref
    }

    async fn ensure_table(&self) -> Result<()> {
        // `add table` is a no-op for an existing table
        self.nft(self.base_args("add", "table"))?;
        Ok(())
    }

    async fn create_set(&self, auto_merge: bool) -> Result<()> {
        let mut args = self.base_args("add", "set");
        args.push(self.set_ref.set.clone());
        args.push(if auto_merge { SET_SPEC_AUTO_MERGE } else { SET_SPEC_PLAIN }.to_string());
        self.nft(args)?;
        Ok(())
    }

    async fn set_exists(&self) -> Result<bool> {
        let mut args = self.base_args("list", "set");
        args.push(self.set_ref.set.clone());
        let output = self.executor.execute(nft_path(), &args)?;
        if output.success {
            Ok(true)
        } else if is_missing_object(&output.stderr) {
            Ok(false)
        } else {
            Err(BlocksyncError::Firewall(format!(
                "nft list set failed: {}",
                output.stderr.trim()
            ))
            .into())
        }
    }

    async fn add_elements(&self, elements: &[NetworkPrefix]) -> Result<()> {
        if elements.is_empty() {
            return Ok(());
        }
        let mut args = self.base_args("add", "element");
        args.push(self.set_ref.set.clone());
        args.push(Self::element_block(elements)?);
        self.nft(args)?;
        Ok(())
    }

    async fn remove_element(&self, element: &NetworkPrefix) -> Result<()> {
        let mut args = self.base_args("delete", "element");
        args.push(self.set_ref.set.clone());
        args.push(Self::element_block(std::slice::from_ref(element))?);
        self.nft(args)?;
        Ok(())
    }

    async fn list_elements(&self) -> Result<Vec<String>> {
        let mut args = self.base_args("list", "set");
        args.push(self.set_ref.set.clone());
        let output = self.executor.execute(nft_path(), &args)?;
        if output.success {
            Ok(parse_set_elements(&output.stdout))
        } else if is_missing_object(&output.stderr) {
            Err(self.set_ref.set_missing().into())
        } else {
            Err(BlocksyncError::Firewall(format!(
                "nft list set failed: {}",
                output.stderr.trim()
            ))
            .into())
        }
    }

    async fn list_rules(&self, chain: &str) -> Result<Vec<String>> {
        let mut args = vec!["-a".to_string()];
        args.extend(self.base_args("list", "chain"));
        args.push(chain.to_string());
        let output = self.executor.execute(nft_path(), &args)?;
        if output.success {
            Ok(parse_chain_rules(&output.stdout))
        } else if is_missing_object(&output.stderr) {
            Err(self.set_ref.chain_missing(chain).into())
        } else {
            Err(BlocksyncError::Firewall(format!(
                "nft list chain {} failed: {}",
                chain,
                output.stderr.trim()
            ))
            .into())
        }
    }

    async fn insert_rule(&self, chain: &str, rule: &EnforcementRule) -> Result<()> {
        let mut args = self.base_args("insert", "rule");
        args.push(chain.to_string());
        args.extend(rule.nft_args());
        match self.nft(args) {
            Err(e) if e.to_string().contains("No such file or directory") => {
                Err(self.set_ref.chain_missing(chain).into())
            }
            other => other.map(|_| ()),
        }
    }
}

/// Extract the members of an `nft list set` listing.
///
/// nft wraps long element lists over several lines, so everything between
/// `elements = {` and the closing brace is collected. Per-element
/// annotations (`timeout 1h`, `counter ...`) are dropped.
pub fn parse_set_elements(output: &str) -> Vec<String> {
    let Some(start) = output.find("elements = {") else {
        return Vec::new();
    };
    let body = &output[start + "elements = {".len()..];
    let body = body.split('}').next().unwrap_or_default();

    body.split(',')
        .filter_map(|entry| entry.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Extract rule lines from an `nft -a list chain` listing.
///
/// Skips the table/chain headers, the base-chain `type ... hook` line,
/// braces and blank lines.
fn parse_chain_rules(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| {
            !line.is_empty()
                && *line != "}"
                && !line.starts_with("table ")
                && !line.starts_with("chain ")
                && !line.starts_with("type ")
                && !line.starts_with("policy ")
        })
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd_abstraction::{CommandOutput, MockCommandExecutor};

    const SET_LISTING: &str = "table inet filter {
\tset blacklist {
\t\ttype ipv4_addr
\t\tflags interval
\t\tauto-merge
\t\telements = { 1.10.16.0/20, 2.57.122.0/24,
\t\t\t     5.134.128.0/19, 198.51.100.5 }
\t}
}
";

    const CHAIN_LISTING: &str = "table inet filter {
\tchain input { # handle 1
\t\ttype filter hook input priority filter; policy drop;
\t\tip saddr @blacklist counter packets 12 bytes 720 drop comment \"blocksync-drop\" # handle 9
\t\tct state established,related accept # handle 4
\t\tiif \"lo\" accept # handle 5
\t}
}
";

    fn engine(mock: MockCommandExecutor) -> NftablesEngine<MockCommandExecutor> {
        NftablesEngine::new(mock, SetRef::default())
    }

    fn p(s: &str) -> NetworkPrefix {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_set_elements_multiline() {
        let elements = parse_set_elements(SET_LISTING);
        assert_eq!(
            elements,
            vec!["1.10.16.0/20", "2.57.122.0/24", "5.134.128.0/19", "198.51.100.5"]
        );
    }

    #[test]
    fn test_parse_set_elements_empty_set() {
        let output = "table inet filter {\n\tset blacklist {\n\t\ttype ipv4_addr\n\t\tflags interval\n\t}\n}\n";
        assert!(parse_set_elements(output).is_empty());
    }

    #[test]
    fn test_parse_set_elements_annotations() {
        let output = "elements = { 10.0.0.0/8 counter packets 0 bytes 0, 192.0.2.1 timeout 1h }";
        assert_eq!(parse_set_elements(output), vec!["10.0.0.0/8", "192.0.2.1"]);
    }

    #[test]
    fn test_parse_set_elements_merged_range() {
        let output = "elements = { 10.0.0.1-10.0.0.9, 192.0.2.0/24 }";
        assert_eq!(
            parse_set_elements(output),
            vec!["10.0.0.1-10.0.0.9", "192.0.2.0/24"]
        );
    }

    #[test]
    fn test_parse_chain_rules() {
        let rules = parse_chain_rules(CHAIN_LISTING);
        assert_eq!(rules.len(), 3);
        assert!(rules[0].starts_with("ip saddr @blacklist"));
        assert!(rules.iter().all(|r| !r.contains("hook input")));
    }

    #[test]
    fn test_is_safe_nft_element() {
        assert!(is_safe_nft_element("192.168.1.0/24"));
        assert!(is_safe_nft_element("10.0.0.1"));
        assert!(!is_safe_nft_element(""));
        assert!(!is_safe_nft_element("10.0.0.1 }"));
        assert!(!is_safe_nft_element("1.2.3.4; flush ruleset"));
        assert!(!is_safe_nft_element("1.2.3.4, 5.6.7.8"));
        assert!(!is_safe_nft_element("$(id)"));
    }

    #[tokio::test]
    async fn test_add_elements_builds_single_command() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .withf(|_, args| {
                args[..5] == ["add", "element", "inet", "filter", "blacklist"]
                    && args[5] == "{ 192.0.2.0/24, 198.51.100.5 }"
            })
            .times(1)
            .returning(|_, _| Ok(CommandOutput::ok("")));

        engine(mock)
            .add_elements(&[p("192.0.2.0/24"), p("198.51.100.5")])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_elements_rendered_as_nft_lists_them() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .withf(|_, args| args[0] == "add" && args[5] == "{ 1.2.3.4, 10.0.0.0/8 }")
            .times(1)
            .returning(|_, _| Ok(CommandOutput::ok("")));
        mock.expect_execute()
            .withf(|_, args| args[0] == "delete" && args[5] == "{ 1.2.3.4 }")
            .times(1)
            .returning(|_, _| Ok(CommandOutput::ok("")));

        let engine = engine(mock);
        engine
            .add_elements(&[p("1.2.3.4/32"), p("10.0.0.1/8")])
            .await
            .unwrap();
        engine.remove_element(&p("1.2.3.4/32")).await.unwrap();
    }

    #[tokio::test]
    async fn test_add_elements_empty_is_noop() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute().times(0);
        engine(mock).add_elements(&[]).await.unwrap();
    }

    #[tokio::test]
    async fn test_add_elements_failure_carries_stderr() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute().returning(|_, _| {
            Ok(CommandOutput::failed(
                "Error: interval overlaps with an existing one",
            ))
        });

        let err = engine(mock).add_elements(&[p("10.0.0.0/8")]).await.unwrap_err();
        assert!(err.to_string().contains("overlaps"));
    }

    #[tokio::test]
    async fn test_create_set_with_auto_merge() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .withf(|_, args| {
                args[..5] == ["add", "set", "inet", "filter", "blacklist"]
                    && args[5].contains("auto-merge")
                    && args[5].contains("flags interval")
            })
            .times(1)
            .returning(|_, _| Ok(CommandOutput::ok("")));
        engine(mock).create_set(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_set_plain_interval() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .withf(|_, args| !args[5].contains("auto-merge"))
            .times(1)
            .returning(|_, _| Ok(CommandOutput::ok("")));
        engine(mock).create_set(false).await.unwrap();
    }

    #[tokio::test]
    async fn test_set_exists() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .times(1)
            .returning(|_, _| Ok(CommandOutput::ok(SET_LISTING)));
        assert!(engine(mock).set_exists().await.unwrap());

        let mut mock = MockCommandExecutor::new();
        mock.expect_execute().times(1).returning(|_, _| {
            Ok(CommandOutput::failed(
                "Error: No such file or directory; did you mean set 'blocklist' in table inet 'filter'?",
            ))
        });
        assert!(!engine(mock).set_exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_list_elements_missing_set() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .returning(|_, _| Ok(CommandOutput::failed("Error: No such file or directory")));

        let err = engine(mock).list_elements().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BlocksyncError>(),
            Some(BlocksyncError::SetMissing { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_rules_uses_handles() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .withf(|_, args| args[0] == "-a" && args[1..] == ["list", "chain", "inet", "filter", "input"])
            .returning(|_, _| Ok(CommandOutput::ok(CHAIN_LISTING)));

        let rules = engine(mock).list_rules("input").await.unwrap();
        assert_eq!(rules.len(), 3);
    }

    #[tokio::test]
    async fn test_list_rules_missing_chain() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute().returning(|_, _| {
            Ok(CommandOutput::failed(
                "Error: No such file or directory\nlist chain inet filter forward",
            ))
        });

        let err = engine(mock).list_rules("forward").await.unwrap_err();
        match err.downcast_ref::<BlocksyncError>() {
            Some(BlocksyncError::ChainMissing { chain, .. }) => assert_eq!(chain, "forward"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_insert_rule_args() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .withf(|_, args| {
                args[..5] == ["insert", "rule", "inet", "filter", "forward"]
                    && args[5..].join(" ")
                        == "ip saddr @blacklist counter drop comment \"blocksync-drop\""
            })
            .times(1)
            .returning(|_, _| Ok(CommandOutput::ok("")));

        let rule = EnforcementRule::new("forward", "blacklist", "blocksync-drop");
        engine(mock).insert_rule("forward", &rule).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_element_args() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .withf(|_, args| args[0] == "delete" && args[5] == "{ 81.30.0.0/16 }")
            .times(1)
            .returning(|_, _| Ok(CommandOutput::ok("")));
        engine(mock).remove_element(&p("81.30.0.0/16")).await.unwrap();
    }
}
