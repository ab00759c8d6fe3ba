//! Compilation of a [`Query`] into a native read command.
//!
//! Plain queries become `find` commands. Grouping, distinct and aggregate queries
//! become pipelines with the stages
//! `$match? → $unwind? → $group → $sort? → $skip? → $limit? → $project?`.

use bson::{Bson, Document, doc};
use tracing::trace;

use crate::{
    command::{AggregateOptions, Command, FindOptions},
    error::{DocumentStoreError, DocumentStoreResult},
    path::AttributePath,
    query::{AggregateFunction, GroupKey, Query, SortKey},
    translate::FilterTranslator,
};

impl Query {
    /// Compiles this query into a `find` or `aggregate` command.
    ///
    /// Fails with the first error recorded by the builder, or with
    /// [`DocumentStoreError::UnsupportedOperation`] when the query uses a shape
    /// with no native translation.
    pub fn to_mql(&self) -> DocumentStoreResult<Command> {
        self.ensure_supported()?;
        let filter = self.compile_filter()?;

        let command = if self.needs_pipeline() {
            Command::Aggregate {
                pipeline: self.compile_pipeline(filter)?,
                options: AggregateOptions {
                    hint: self.options.hint.clone(),
                    max_time_ms: self.max_time_ms(),
                    comment: self.options.comment.clone(),
                },
            }
        } else {
            Command::Find {
                filter,
                options: FindOptions {
                    sort: self.compile_sort(),
                    skip: self.offset,
                    limit: self.limit,
                    projection: self.compile_projection(),
                    hint: self.options.hint.clone(),
                    max_time_ms: self.max_time_ms(),
                    comment: self.options.comment.clone(),
                },
            }
        };

        trace!(command = %command, "compiled query");
        Ok(command)
    }

    /// Compiles an aggregate over this query. `field` is an attribute path and may
    /// contain a `*` segment; `None` counts documents.
    pub fn to_aggregate_mql(&self, function: AggregateFunction, field: Option<&str>) -> DocumentStoreResult<Command> {
        self.clone().into_builder().with_aggregate(function, field).build().to_mql()
    }

    pub(crate) fn ensure_supported(&self) -> DocumentStoreResult<()> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if let Some(having) = self.havings.first() {
            return Err(DocumentStoreError::unsupported(*having));
        }
        if let Some(union) = self.unions.first() {
            return Err(DocumentStoreError::unsupported(*union));
        }
        for sort in &self.orders {
            match sort.key {
                SortKey::Raw(_) => return Err(DocumentStoreError::unsupported("order_by_raw")),
                SortKey::Random => return Err(DocumentStoreError::unsupported("in_random_order")),
                SortKey::Field(_) => {}
            }
        }
        if self.groups.iter().any(|group| matches!(group, GroupKey::Raw(_))) {
            return Err(DocumentStoreError::unsupported("group_by_raw"));
        }
        Ok(())
    }

    pub(crate) fn compile_filter(&self) -> DocumentStoreResult<Document> {
        FilterTranslator::new(self.casts()).translate(self.clauses())
    }

    fn needs_pipeline(&self) -> bool {
        self.distinct || !self.groups.is_empty() || self.aggregate.is_some()
    }

    fn max_time_ms(&self) -> Option<u64> {
        self.options
            .timeout
            .map(|timeout| u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))
    }

    fn compile_sort(&self) -> Option<Document> {
        let sort: Document = self
            .orders
            .iter()
            .filter_map(|sort| match &sort.key {
                SortKey::Field(field) => Some((field.clone(), Bson::Int32(sort.direction.weight()))),
                SortKey::Raw(_) | SortKey::Random => None,
            })
            .collect();

        (!sort.is_empty()).then_some(sort)
    }

    fn compile_projection(&self) -> Option<Document> {
        let mut projection: Document = self
            .columns
            .iter()
            .map(|column| (column.clone(), Bson::Boolean(true)))
            .collect();
        projection.extend(self.projection.clone());

        (!projection.is_empty()).then_some(projection)
    }

    /// The grouping keys: explicit groups, or the selected columns of a distinct query.
    fn group_keys(&self) -> Vec<&str> {
        let groups: Vec<&str> = self
            .groups
            .iter()
            .filter_map(|group| match group {
                GroupKey::Field(field) => Some(field.as_str()),
                GroupKey::Raw(_) => None,
            })
            .collect();

        if groups.is_empty() && self.distinct {
            self.columns.iter().map(String::as_str).collect()
        } else {
            groups
        }
    }

    fn compile_pipeline(&self, filter: Document) -> DocumentStoreResult<Vec<Document>> {
        let mut pipeline = Vec::new();
        if !filter.is_empty() {
            pipeline.push(doc! { "$match": filter });
        }

        let aggregate_path = self
            .aggregate
            .as_ref()
            .and_then(|aggregate| aggregate.field.as_deref())
            .map(AttributePath::parse);
        if let Some((prefix, _)) = aggregate_path.as_ref().and_then(AttributePath::split_wildcard) {
            pipeline.push(doc! { "$unwind": format!("${}", prefix.storage_path()) });
        }

        pipeline.push(doc! { "$group": self.compile_group(aggregate_path.as_ref())? });

        // Scalar aggregates ignore ordering and paging.
        if self.aggregate.is_none() {
            if let Some(sort) = self.compile_sort() {
                pipeline.push(doc! { "$sort": sort });
            }
            if let Some(skip) = self.offset {
                pipeline.push(doc! { "$skip": i64::try_from(skip).unwrap_or(i64::MAX) });
            }
            if let Some(limit) = self.limit {
                pipeline.push(doc! { "$limit": limit });
            }
            if !self.projection.is_empty() {
                pipeline.push(doc! { "$project": self.projection.clone() });
            }
        }

        Ok(pipeline)
    }

    fn compile_group(&self, aggregate_path: Option<&AttributePath>) -> DocumentStoreResult<Document> {
        let keys = self.group_keys();
        if keys.is_empty() && self.aggregate.is_none() {
            return Err(DocumentStoreError::invalid_operand(
                "distinct",
                "a distinct query needs at least one selected column",
            ));
        }

        let id = if keys.is_empty() {
            Bson::Null
        } else {
            Bson::Document(keys.iter().map(|key| (key.to_string(), Bson::String(format!("${key}")))).collect())
        };

        // `_id` is only ever carried inside the composite key
        let mut group = doc! { "_id": id };
        for key in keys.iter().filter(|key| **key != "_id") {
            group.insert(*key, doc! { "$last": format!("${key}") });
        }

        match &self.aggregate {
            None => {
                for column in &self.columns {
                    if column != "_id" && !keys.contains(&column.as_str()) {
                        group.insert(column.clone(), doc! { "$last": format!("${column}") });
                    }
                }
            }
            Some(aggregate) => {
                let accumulator = match (aggregate.function, aggregate_path) {
                    (AggregateFunction::Count, _) => doc! { "$sum": 1 },
                    (function, Some(path)) => {
                        doc! { function.accumulator(): format!("${}", path.storage_path()) }
                    }
                    (function, None) => {
                        return Err(DocumentStoreError::invalid_operand(
                            function.name(),
                            "an attribute path is required",
                        ));
                    }
                };
                group.insert("aggregate", accumulator);
            }
        }

        Ok(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SortDirection;
    use std::time::Duration;

    #[test]
    fn plain_queries_compile_to_find() {
        let command = Query::builder()
            .where_eq("name", "John Doe")
            .order_by("age", SortDirection::Desc)
            .offset(5)
            .limit(10)
            .select(["name", "age"])
            .hint(doc! { "$natural": -1 })
            .timeout(Duration::from_millis(1500))
            .build()
            .to_mql()
            .unwrap();

        assert_eq!(
            command,
            Command::Find {
                filter: doc! { "name": "John Doe" },
                options: FindOptions {
                    sort: Some(doc! { "age": -1 }),
                    skip: Some(5),
                    limit: Some(10),
                    projection: Some(doc! { "name": true, "age": true }),
                    hint: Some(Bson::Document(doc! { "$natural": -1 })),
                    max_time_ms: Some(1500),
                    comment: None,
                },
            }
        );
    }

    #[test]
    fn group_by_compiles_to_pipeline() {
        let command = Query::builder()
            .where_op("age", ">", 30)
            .group_by(["title"])
            .select(["title", "name"])
            .order_by("title", SortDirection::Asc)
            .limit(5)
            .build()
            .to_mql()
            .unwrap();

        assert_eq!(
            command.pipeline().unwrap(),
            &[
                doc! { "$match": { "age": { "$gt": 30 } } },
                doc! { "$group": {
                    "_id": { "title": "$title" },
                    "title": { "$last": "$title" },
                    "name": { "$last": "$name" },
                } },
                doc! { "$sort": { "title": 1 } },
                doc! { "$limit": 5_i64 },
            ]
        );
    }

    #[test]
    fn distinct_groups_on_selected_columns() {
        let command = Query::builder().distinct_on("type").build().to_mql().unwrap();

        assert_eq!(
            command.pipeline().unwrap(),
            &[doc! { "$group": { "_id": { "type": "$type" }, "type": { "$last": "$type" } } }]
        );

        let err = Query::builder().distinct().build().to_mql().unwrap_err();
        assert!(matches!(err, DocumentStoreError::InvalidOperand { .. }));
    }

    #[test]
    fn grouping_on_the_key_keeps_it_in_the_composite_id() {
        let command = Query::builder().group_by(["_id", "email"]).build().to_mql().unwrap();

        assert_eq!(
            command.pipeline().unwrap(),
            &[doc! { "$group": {
                "_id": { "_id": "$_id", "email": "$email" },
                "email": { "$last": "$email" },
            } }]
        );
    }

    #[test]
    fn aggregates_skip_ordering_and_paging() {
        let query = Query::builder()
            .where_eq("name", "spoon")
            .order_by("amount", SortDirection::Asc)
            .limit(3)
            .build();

        assert_eq!(
            query.to_aggregate_mql(AggregateFunction::Max, Some("amount")).unwrap().pipeline().unwrap(),
            &[
                doc! { "$match": { "name": "spoon" } },
                doc! { "$group": { "_id": null, "aggregate": { "$max": "$amount" } } },
            ]
        );
        assert_eq!(
            query.to_aggregate_mql(AggregateFunction::Count, None).unwrap().pipeline().unwrap()[1],
            doc! { "$group": { "_id": null, "aggregate": { "$sum": 1 } } }
        );
    }

    #[test]
    fn wildcard_paths_unwind_their_prefix() {
        let command = Query::new().to_aggregate_mql(AggregateFunction::Sum, Some("amount.*.hidden")).unwrap();

        assert_eq!(
            command.pipeline().unwrap(),
            &[
                doc! { "$unwind": "$amount" },
                doc! { "$group": { "_id": null, "aggregate": { "$sum": "$amount.hidden" } } },
            ]
        );
    }

    #[test]
    fn unsupported_shapes_are_rejected_before_execution() {
        let cases = [
            (Query::builder().in_random_order().build(), "in_random_order"),
            (Query::builder().order_by_raw("name desc").build(), "order_by_raw"),
            (Query::builder().group_by_raw("year(created_at)").build(), "group_by_raw"),
            (Query::builder().having("n", ">", 1).build(), "having"),
            (Query::builder().having_between("n", [1, 2]).build(), "having_between"),
            (Query::builder().union_all(Query::new()).build(), "union_all"),
        ];

        for (query, name) in cases {
            assert_eq!(
                query.to_mql().unwrap_err(),
                DocumentStoreError::UnsupportedOperation(name.to_string())
            );
        }
    }

    #[test]
    fn compilation_does_not_consume_the_query() {
        let query = Query::builder().where_eq("a", 1).build();
        assert_eq!(query.to_mql().unwrap(), query.to_mql().unwrap());
    }
}
