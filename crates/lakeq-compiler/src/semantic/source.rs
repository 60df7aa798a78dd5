//! Data source resolution.

use lakeq_core::ast;
use lakeq_core::dag::Op;
use lakeq_core::error::{Error, Result};
use lakeq_core::lake::{CommitId, MetaKind, PoolId};

use super::Analyzer;

impl Analyzer<'_> {
    /// Lower a source into one source operator per matched pool.
    pub(crate) fn lower_source(&mut self, source: &ast::Source) -> Result<Vec<Op>> {
        match source {
            ast::Source::Pool {
                name,
                commit,
                meta,
                tap,
            } => {
                let (pools, default_commit) = match name {
                    ast::PoolName::Head => {
                        let head = self
                            .head
                            .ok_or_else(|| Error::semantic("cannot scan from unknown HEAD"))?;
                        (
                            vec![self.resolve_pool_name(&head.pool)?],
                            head.branch.clone(),
                        )
                    }
                    ast::PoolName::Text { name } => {
                        (vec![self.resolve_pool_name(name)?], "main".to_string())
                    }
                    ast::PoolName::Glob { pattern } => {
                        let pat = glob::Pattern::new(pattern).map_err(|e| {
                            Error::semantic(format!("invalid pool glob {pattern:?}: {e}"))
                        })?;
                        (self.match_pools(pattern, |n| pat.matches(n))?, "main".to_string())
                    }
                    ast::PoolName::Regexp { pattern } => {
                        let re = regex::Regex::new(pattern).map_err(|e| {
                            Error::semantic(format!("invalid pool regexp {pattern:?}: {e}"))
                        })?;
                        (self.match_pools(pattern, |n| re.is_match(n))?, "main".to_string())
                    }
                };
                let commit = commit.as_deref().unwrap_or(&default_commit);
                pools
                    .into_iter()
                    .map(|(pool, pool_name)| {
                        self.pool_source(pool, pool_name, commit, meta.as_deref(), *tap)
                    })
                    .collect()
            }
            ast::Source::LakeMeta { meta } => match MetaKind::parse(meta) {
                Some(MetaKind::Pools) => Ok(vec![Op::LakeMetaScan { meta: meta.clone() }]),
                _ => Err(Error::semantic(format!("unknown lake metadata type: {meta}"))),
            },
            ast::Source::File { path, format } => Ok(vec![Op::FileScan {
                path: path.clone(),
                format: format.clone(),
                filter: None,
                pruner: None,
                demand: None,
            }]),
            ast::Source::Http {
                url,
                format,
                method,
            } => Ok(vec![Op::HttpScan {
                url: url.clone(),
                format: format.clone(),
                method: method.clone(),
                filter: None,
                demand: None,
            }]),
            ast::Source::Pass => Ok(vec![Op::Pass]),
        }
    }

    fn pool_source(
        &mut self,
        pool: PoolId,
        pool_name: String,
        commit: &str,
        meta: Option<&str>,
        tap: bool,
    ) -> Result<Op> {
        match meta.map(|m| (m, MetaKind::parse(m))) {
            None => {
                let commit = self.resolve_commit(pool, &pool_name, Some(commit))?;
                Ok(Op::PoolScan {
                    pool,
                    pool_name,
                    commit,
                })
            }
            Some((m, Some(MetaKind::Branches))) => Ok(Op::PoolMetaScan {
                pool,
                pool_name,
                meta: m.to_string(),
            }),
            Some((m, Some(MetaKind::Objects | MetaKind::Log))) => {
                let commit = self.resolve_commit(pool, &pool_name, Some(commit))?;
                Ok(Op::CommitMetaScan {
                    pool,
                    pool_name,
                    commit,
                    meta: m.to_string(),
                    tap,
                    key_pruner: None,
                })
            }
            Some((m, _)) => Err(Error::semantic(format!("unknown pool metadata type: {m}"))),
        }
    }

    /// A literal pool id is taken as is; anything else is looked up by name.
    pub(crate) fn resolve_pool_name(&mut self, name: &str) -> Result<(PoolId, String)> {
        if name.is_empty() {
            return Err(Error::semantic("missing pool name"));
        }
        if let Some(id) = PoolId::parse(name) {
            return Ok((id, name.to_string()));
        }
        match self
            .adaptor
            .lookup_pool(name)
            .map_err(|e| e.with_context(format!("pool {name}")))?
        {
            Some(id) => Ok((id, name.to_string())),
            None => Err(Error::NotFound(name.to_string())),
        }
    }

    /// Resolve a commit reference; `None` means the tip of `main`.
    pub(crate) fn resolve_commit(
        &mut self,
        pool: PoolId,
        pool_name: &str,
        commit: Option<&str>,
    ) -> Result<CommitId> {
        let commit = commit.unwrap_or("main");
        if let Some(id) = CommitId::parse(commit) {
            return Ok(id);
        }
        self.adaptor
            .resolve_commit(pool, commit)
            .map_err(|e| e.with_context(format!("{pool_name}@{commit}")))
    }

    fn match_pools(
        &mut self,
        pattern: &str,
        matches: impl Fn(&str) -> bool,
    ) -> Result<Vec<(PoolId, String)>> {
        let names = self
            .adaptor
            .pool_names()
            .map_err(|e| e.with_context(format!("pools matching {pattern}")))?;
        let mut out = Vec::new();
        for name in names.iter().filter(|n| matches(n.as_str())) {
            out.push(self.resolve_pool_name(name)?);
        }
        if out.is_empty() {
            return Err(Error::NotFound(format!("pools matching {pattern}")));
        }
        tracing::debug!(pattern, matched = out.len(), "expanded pool pattern");
        Ok(out)
    }
}
