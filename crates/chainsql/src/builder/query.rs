//! Query assembly: chain resolution, join rendering, quoting and limits.

use super::chain::ChainResolver;
use super::join::JoinPlan;
use super::quote::delimite;
use super::{unqualified, BuiltQuery, LeftCondition, SqlBuilder};
use crate::driver::Feature;
use crate::error::{OrmError, OrmResult};
use crate::value::Value;

impl SqlBuilder {
    fn resolver(&self) -> ChainResolver<'_> {
        ChainResolver::new(
            &self.table,
            self.conventions.as_ref(),
            &self.aliases,
            self.driver.is_supported(Feature::Schema),
        )
    }

    fn where_clause(&self) -> String {
        if self.wheres.is_empty() {
            String::new()
        } else {
            format!(" WHERE ({})", self.wheres.join(") AND ("))
        }
    }

    fn query_end(&self) -> String {
        let mut end = String::new();
        if !self.group.is_empty() {
            end.push_str(" GROUP BY ");
            end.push_str(&self.group);
        }
        if !self.having.is_empty() {
            end.push_str(" HAVING ");
            end.push_str(&self.having);
        }
        if !self.order.is_empty() {
            end.push_str(" ORDER BY ");
            end.push_str(&self.order.join(", "));
        }
        end
    }

    fn index_hint(indexes: Option<&[String]>) -> String {
        match indexes {
            Some(names) if !names.is_empty() => format!(" FORCE INDEX ({})", names.join(", ")),
            _ => String::new(),
        }
    }

    /// Quote identifiers and apply external table prefixes.
    fn finish(&self, sql: &str) -> String {
        self.driver.rewrite_external(delimite(sql, self.driver.as_ref()))
    }

    /// Render `LEFT JOIN`s, attaching each left condition to the join it
    /// targets. Returns the SQL and the left parameters in render order.
    fn render_joins(
        &self,
        joins: &JoinPlan,
        left: &[(String, &LeftCondition)],
    ) -> (String, Vec<Value>) {
        let mut sql = String::new();
        let mut params = Vec::new();
        for join in joins.iter() {
            sql.push_str(" LEFT JOIN ");
            sql.push_str(&join.table);
            if join.alias != join.table {
                sql.push_str(" AS ");
                sql.push_str(&join.alias);
            }
            sql.push_str(&Self::index_hint(
                self.force_indexes
                    .get(&Some(join.alias.clone()))
                    .or_else(|| self.force_indexes.get(&Some(join.table.clone())))
                    .map(Vec::as_slice),
            ));
            sql.push_str(&format!(
                " ON {}.{} = {}.{}",
                join.parent_alias, join.column, join.alias, join.primary
            ));

            let attached: Vec<&(String, &LeftCondition)> =
                left.iter().filter(|(target, _)| *target == join.alias).collect();
            if !attached.is_empty() {
                let texts: Vec<&str> = attached.iter().map(|(_, l)| l.text.as_str()).collect();
                sql.push_str(&format!(" AND ({})", texts.join(") AND (")));
                for (_, l) in attached {
                    params.extend(l.params.iter().cloned());
                }
            }
        }
        (sql, params)
    }

    /// Nothing is selected and the driver can only select grouped
    /// columns, so the group expression doubles as the select list.
    fn selects_group(&self) -> bool {
        self.select.is_empty()
            && !self.group.is_empty()
            && !self.driver.is_supported(Feature::SelectUngroupedColumns)
    }

    /// Build the `SELECT` and collect its parameters.
    ///
    /// `columns` is used when nothing was selected explicitly.
    pub fn build_select(&self, columns: Option<&[&str]>) -> OrmResult<BuiltQuery> {
        let mut resolver = self.resolver();
        let mut joins = JoinPlan::new();

        let conditions = resolver.rewrite(&self.where_clause(), &mut joins)?;
        let end = resolver.rewrite(&self.query_end(), &mut joins)?;

        let mut rewritten = Vec::with_capacity(self.left.len());
        for condition in &self.left {
            let (text, targets) = resolver.rewrite_with_targets(&condition.text, &mut joins)?;
            rewritten.push((
                LeftCondition {
                    text,
                    params: condition.params.clone(),
                },
                targets,
            ));
        }

        let table_alias = unqualified(&self.table);
        let mut select_params = self.select_params.clone();
        let select = if !self.select.is_empty() {
            self.select.join(", ")
        } else if let Some(columns) = columns.filter(|c| !c.is_empty()) {
            if joins.is_empty() {
                columns.join(", ")
            } else {
                columns
                    .iter()
                    .map(|c| format!("{table_alias}.{c}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            }
        } else if self.selects_group() {
            select_params.extend(self.group_params.iter().cloned());
            self.group.clone()
        } else {
            format!("{table_alias}.*")
        };
        let select = resolver.rewrite(&select, &mut joins)?;

        let mut left = Vec::with_capacity(rewritten.len());
        for (original, (condition, targets)) in self.left.iter().zip(&rewritten) {
            let target = targets
                .iter()
                .filter_map(|t| joins.position(t).map(|position| (position, t)))
                .max_by_key(|(position, _)| *position)
                .map(|(_, t)| t.clone())
                .ok_or_else(|| OrmError::DetachedLeftCondition(original.text.clone()))?;
            left.push((target, condition));
        }

        let (join_sql, left_params) = self.render_joins(&joins, &left);

        let mut sql = format!(
            "SELECT {select} FROM {}{}{join_sql}{conditions}{end}",
            self.table,
            Self::index_hint(self.force_index(None)),
        );
        self.driver.apply_limit(&mut sql, self.limit, self.offset);

        let mut params = Vec::with_capacity(
            select_params.len()
                + left_params.len()
                + self.where_params.len()
                + self.group_params.len()
                + self.having_params.len()
                + self.order_params.len(),
        );
        params.extend(select_params);
        params.extend(left_params);
        params.extend(self.where_params.iter().cloned());
        params.extend(self.group_params.iter().cloned());
        params.extend(self.having_params.iter().cloned());
        params.extend(self.order_params.iter().cloned());

        let sql = self.finish(&sql);
        tracing::trace!(target: "chainsql.builder", table = %self.table, sql = %sql, "built select");
        Ok(BuiltQuery::new(sql, params))
    }

    pub fn build_select_query(&self, columns: Option<&[&str]>) -> OrmResult<String> {
        Ok(self.build_select(columns)?.sql)
    }

    /// Parameters of the select query, in placeholder order.
    pub fn get_parameters(&self) -> OrmResult<Vec<Value>> {
        if self.left.is_empty() {
            let mut params = self.select_params.clone();
            if self.selects_group() {
                params.extend(self.group_params.iter().cloned());
            }
            params.extend(self.where_params.iter().cloned());
            params.extend(self.group_params.iter().cloned());
            params.extend(self.having_params.iter().cloned());
            params.extend(self.order_params.iter().cloned());
            return Ok(params);
        }
        Ok(self.build_select(None)?.params)
    }

    /// Query used when this builder is bound as a sub-query argument.
    /// Selects the primary key when nothing else was selected.
    pub(crate) fn compile_subquery(&self) -> OrmResult<BuiltQuery> {
        if !self.select.is_empty() {
            return self.build_select(None);
        }
        let primary = self
            .primary()
            .ok_or_else(|| OrmError::SubQueryWithoutSelect(self.table.clone()))?;
        let alias = unqualified(&self.table);
        let columns = primary
            .columns()
            .iter()
            .map(|c| format!("{alias}.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut inner = self.clone();
        inner.add_select(&columns)?;
        inner.build_select(None)
    }

    fn check_mutation(&self, statement: &'static str) -> OrmResult<()> {
        if self.limit.is_some() || self.offset.is_some_and(|o| o > 0) {
            return Err(OrmError::UnsupportedLimitOnMutation(statement));
        }
        if !self.left.is_empty() {
            return Err(OrmError::UnsupportedJoinOnMutation(statement));
        }
        Ok(())
    }

    fn mutation_conditions(&self, statement: &'static str) -> OrmResult<String> {
        let mut joins = JoinPlan::new();
        let conditions = self.resolver().rewrite(&self.where_clause(), &mut joins)?;
        if !joins.is_empty() {
            return Err(OrmError::UnsupportedJoinOnMutation(statement));
        }
        Ok(conditions)
    }

    /// `INSERT INTO table`; the caller appends the values.
    pub fn build_insert_query(&self) -> String {
        self.finish(&format!("INSERT INTO {}", self.table))
    }

    /// `UPDATE table SET ?` followed by the where clause. The `?` takes
    /// the assignments; where parameters follow it.
    pub fn build_update_query(&self) -> OrmResult<String> {
        self.check_mutation("UPDATE")?;
        let conditions = self.mutation_conditions("UPDATE")?;
        Ok(self.finish(&format!("UPDATE {} SET ?{conditions}", self.table)))
    }

    pub fn build_delete_query(&self) -> OrmResult<String> {
        self.check_mutation("DELETE")?;
        let conditions = self.mutation_conditions("DELETE")?;
        Ok(self.finish(&format!("DELETE FROM {}{conditions}", self.table)))
    }
}
