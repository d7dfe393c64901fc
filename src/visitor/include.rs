//! Eager loading.
//!
//! Reference navigations are joined into the root select and shaped from the
//! same row. Collection navigations are loaded by a split command per
//! navigation: the child table joined to the parent keys of the root query,
//! narrowed to the same rows. Fixup connects children to their parents.

use super::{Frame, QueryModelVisitor, SourceInfo, SplitQuery, key_columns, table_source};
use crate::error::{Diagnostic, DiagnosticCode, RelqError, RelqResult};
use crate::metadata::Navigation;
use crate::shaper::{EntityShaper, IncludeShaper, Shaper};
use crate::sql::{Join, JoinKind, Select, SqlExpr, TableSource};
use std::sync::Arc;

/// A collection include waiting for the final parent select.
#[derive(Debug)]
pub(crate) struct PendingSplit {
    path: String,
    navigation: Navigation,
    /// Parent select columns holding the principal key.
    parent_key: Vec<usize>,
    /// Include paths continuing below the collection.
    rest: Vec<Vec<Arc<str>>>,
}

impl<'a> QueryModelVisitor<'a> {
    pub(crate) fn apply_includes(
        &mut self,
        shaper: &mut Shaper,
        paths: &[Vec<Arc<str>>],
    ) -> RelqResult<Vec<PendingSplit>> {
        let (Shaper::Entity(root_shaper), Some(root)) = (shaper, self.root.clone()) else {
            return Err(RelqError::untranslatable(
                "include",
                "include needs a query projecting an entity",
            ));
        };
        self.include_paths(&root, root_shaper, paths, "")
    }

    fn include_paths(
        &mut self,
        owner: &SourceInfo,
        shaper: &mut EntityShaper,
        paths: &[Vec<Arc<str>>],
        prefix: &str,
    ) -> RelqResult<Vec<PendingSplit>> {
        // group by first hop so repeated prefixes load once
        let mut hops: Vec<(Arc<str>, Vec<Vec<Arc<str>>>)> = Vec::new();
        for path in paths {
            let Some((first, rest)) = path.split_first() else {
                continue;
            };
            let index = match hops.iter().position(|(name, _)| name == first) {
                Some(i) => i,
                None => {
                    hops.push((first.clone(), Vec::new()));
                    hops.len() - 1
                }
            };
            if !rest.is_empty() {
                hops[index].1.push(rest.to_vec());
            }
        }

        let mut pending = Vec::new();
        for (name, rest) in hops {
            let navigation = owner.entity.navigation(&name).cloned().ok_or_else(|| {
                RelqError::Metadata(format!(
                    "'{}' has no navigation '{}' to include",
                    owner.entity.name, name
                ))
            })?;
            let path = if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{}.{}", prefix, name)
            };

            if navigation.is_collection() {
                shaper.collections.push(navigation.name.clone());
                pending.push(PendingSplit {
                    path,
                    parent_key: navigation
                        .principal_key
                        .iter()
                        .map(|&i| shaper.start + i)
                        .collect(),
                    navigation,
                    rest,
                });
            } else {
                let target = self.join_navigation(owner, &navigation)?;
                let mut child = self.project_entity(&target)?;
                pending.extend(self.include_paths(&target, &mut child, &rest, &path)?);
                shaper.includes.push(IncludeShaper {
                    navigation: navigation.name.clone(),
                    shaper: child,
                });
            }
        }
        Ok(pending)
    }

    /// Build the split command for `split` against the finished `parent`
    /// select, then recurse into includes below it.
    pub(crate) fn build_split(
        &mut self,
        parent: &Select,
        split: PendingSplit,
    ) -> RelqResult<Vec<SplitQuery>> {
        let navigation = &split.navigation;
        let child = self.model.entity(&navigation.target)?.clone();

        let mut parents = parent.clone();
        parents.projection = split
            .parent_key
            .iter()
            .map(|&i| {
                parent.projection.get(i).cloned().ok_or_else(|| {
                    RelqError::Internal(format!("parent key column {} missing", i))
                })
            })
            .collect::<RelqResult<_>>()?;
        if !parents.is_paged() {
            parents.order_by.clear();
        }

        let parents_alias = self.fresh_alias("t");
        let alias = self.fresh_alias(&child.table);
        let condition = SqlExpr::and_all(navigation.foreign_key.iter().zip(&parents.projection).map(
            |(&fk, key)| {
                SqlExpr::eq(
                    SqlExpr::column(&alias, &child.properties[fk].column),
                    SqlExpr::column(&parents_alias, &key.alias),
                )
            },
        ));

        let mut select = Select::new(table_source(&child, &alias));
        select.joins.push(Join {
            kind: JoinKind::Inner,
            source: TableSource::Subquery {
                select: Box::new(parents),
                alias: parents_alias,
            },
            condition,
        });
        select.identity = key_columns(&child, &alias);

        self.frames.push(Frame::new(select));
        let info = SourceInfo {
            alias,
            entity: child,
            nullable: false,
            frame: self.frames.len() - 1,
        };
        let built = self.project_entity(&info).and_then(|mut shaper| {
            let nested = self.include_paths(&info, &mut shaper, &split.rest, &split.path)?;
            Ok((shaper, nested))
        });
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| RelqError::Internal("split frame lost".into()))?;
        let (shaper, nested) = built?;

        self.ctx.report(Diagnostic::new(
            DiagnosticCode::SplitInclude,
            format!(
                "collection include '{}' is loaded by a separate command",
                split.path
            ),
        ));

        let mut splits = vec![SplitQuery {
            path: split.path,
            select: frame.select,
            shaper,
        }];
        for next in nested {
            let owner = splits[0].select.clone();
            splits.extend(self.build_split(&owner, next)?);
        }
        Ok(splits)
    }
}
