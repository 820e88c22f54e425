//! Assembles the async-graphql dynamic `Schema` from a `SchemaView` (spec
//! §6, §9 "GraphQL Executor Bridge"). Root field names (`<type>s`,
//! `<type>_aggregations`) are generated by walking `SchemaView::types()`
//! rather than declared statically, which is why this module is built on
//! `async_graphql::dynamic` instead of the derive-macro `#[Object]` API —
//! the set of root fields is only known once a schema config is loaded.
//!
//! Everything below is pure schema assembly: process-lifetime data
//! (`SchemaView`, `HiddenTypeGate`, `GraphqlEngineConfig`) is attached via
//! `SchemaBuilder::data`; per-request state (`PlanRegistry`, the
//! relationship `DataLoader`) is attached by the caller via
//! `Request::data` at execution time (see `bin/server.rs`).

use std::collections::HashMap;
use std::sync::Arc;

use async_graphql::dataloader::{DataLoader, Loader};
use async_graphql::dynamic::{
    Enum, Field, FieldFuture, FieldValue, InputValue, Object, ResolverContext, Scalar, Schema,
    SchemaBuilder, TypeRef,
};
use async_graphql::Value as GraphqlValue;
use async_trait::async_trait;
use filter_interpreter::FilterOutcome;
use query_planner::{
    composite_after_key_present, decode_aggregations, AggregationNode, CompositeAdapter,
    CountDetail, DatastoreQuery, IndexTarget, NonCompositeAdapter, Pagination, RoutingSet,
    SortKey, SortOrder,
};
use schema_view::{
    Cardinality, FieldDef, FieldPath, HiddenTypeGate, IndexDefinition, Relationship,
    RelationshipDirection, SchemaView, TypeDef, TypeKind,
};
use serde_json::Value;

use crate::aggregation_builder::build_aggregation_node;
use crate::aggregation_resolver::{
    build_grouped_connection, build_ungrouped_connection, AggregationConnection, AggregationEdge,
};
use crate::config::{GraphqlEngineConfig, GroupingAdapterKind};
use crate::connection::{build_document_connection, value_at, DocumentConnection, DocumentEdge};
use crate::error::EngineError;
use crate::plan_registry::{PlanHandle, PlanRegistry, RawAggregation, RawHits};
use crate::query_builder::{build_document_query, DocumentQueryArgs};
use crate::relationship::{plan_relationship_query, retain_primary_source};
use crate::scalars;

/// Builds the full schema for a loaded `SchemaView`: one node type, one
/// `<Type>Connection`/`<Type>Edge` pair, and two root fields per visible
/// object type with a backing index; the aggregation tree's types are
/// generic and registered once regardless of how many object types exist.
pub fn build_schema(
    schema: Arc<SchemaView>,
    hidden: Arc<HiddenTypeGate>,
    config: Arc<GraphqlEngineConfig>,
) -> Result<Schema, EngineError> {
    let mut builder = Schema::build("Query", None, None);
    builder = register_scalars(builder);
    builder = register_shared_types(builder);

    for type_def in schema.types() {
        match type_def.kind {
            TypeKind::Object if hidden.is_visible(&type_def.name) => {
                builder = builder.register(build_node_object(&schema, &hidden, type_def));
            }
            TypeKind::Enum if !type_def.enum_value_overrides.is_empty() => {
                builder = builder.register(build_enum(type_def));
            }
            _ => {}
        }
    }

    let mut query = Object::new("Query");
    for type_def in schema.types() {
        if type_def.kind != TypeKind::Object || hidden.is_hidden(&type_def.name) {
            continue;
        }
        let Some(index_name) = &type_def.backing_index else { continue };
        let Some(index) = schema.get_index_definition(index_name) else { continue };
        if index.query_cluster.is_none() {
            continue;
        }

        builder = builder.register(build_connection_object(type_def));
        builder = builder.register(build_edge_object(type_def));
        query = query.field(build_root_connection_field(type_def, index));
        query = query.field(build_root_aggregation_field(type_def));
    }

    builder = builder.register(query);
    builder = builder.data(schema).data(hidden).data(config);
    builder.finish().map_err(|e| EngineError::Invariant(e.to_string()))
}

fn register_scalars(mut builder: SchemaBuilder) -> SchemaBuilder {
    for name in [
        scalars::DATE,
        scalars::DATE_TIME,
        scalars::LOCAL_TIME,
        scalars::JSON_SAFE_LONG,
        scalars::LONG_STRING,
        scalars::TIME_ZONE,
        scalars::CURSOR,
        scalars::UNTYPED,
    ] {
        builder = builder.register(Scalar::new(name));
    }
    builder
}

fn register_shared_types(builder: SchemaBuilder) -> SchemaBuilder {
    builder
        .register(build_page_info_object())
        .register(build_aggregation_connection_object())
        .register(build_aggregation_edge_object())
        .register(build_count_detail_object())
}

fn build_enum(type_def: &TypeDef) -> Enum {
    let mut values = Enum::new(&type_def.name);
    for over in &type_def.enum_value_overrides {
        values = values.item(over.graphql_value.clone());
    }
    values
}

// --- node objects -----------------------------------------------------

fn build_node_object(schema: &SchemaView, hidden: &HiddenTypeGate, type_def: &TypeDef) -> Object {
    let mut object = Object::new(&type_def.name);
    for field in &type_def.fields {
        if let Some(built) = build_node_field(schema, hidden, &type_def.name, field) {
            object = object.field(built);
        }
    }
    object
}

fn build_node_field(
    schema: &SchemaView,
    hidden: &HiddenTypeGate,
    type_name: &str,
    field: &FieldDef,
) -> Option<Field> {
    if let Some(relationship) = &field.relationship {
        if hidden.is_hidden(&relationship.target_type) {
            return None;
        }
        return Some(build_relationship_field(type_name, field, relationship));
    }

    if let Some(target) = schema.get_type(&field.declared_type) {
        if target.kind == TypeKind::Object && hidden.is_hidden(&field.declared_type) {
            return None;
        }
    }

    let index_name = field.index_name().to_string();
    let field_name = field.public_name.clone();
    if field.is_list() {
        let type_ref = TypeRef::named_list(field.declared_type.clone());
        Some(Field::new(field_name, type_ref, move |ctx| {
            let index_name = index_name.clone();
            FieldFuture::new(async move {
                let doc = ctx.parent_value.try_downcast_ref::<Value>()?;
                let items = doc.get(&index_name).and_then(Value::as_array).cloned().unwrap_or_default();
                Ok(Some(FieldValue::list(
                    items.into_iter().map(|v| FieldValue::value(scalars::untyped_to_graphql(&v))),
                )))
            })
        }))
    } else {
        let type_ref = TypeRef::named(field.declared_type.clone());
        Some(Field::new(field_name, type_ref, move |ctx| {
            let index_name = index_name.clone();
            FieldFuture::new(async move {
                let doc = ctx.parent_value.try_downcast_ref::<Value>()?;
                match doc.get(&index_name) {
                    Some(raw) if !raw.is_null() => Ok(Some(FieldValue::value(scalars::untyped_to_graphql(raw)))),
                    _ => Ok(None),
                }
            })
        }))
    }
}

fn build_relationship_field(type_name: &str, field: &FieldDef, relationship: &Relationship) -> Field {
    let field_name = field.public_name.clone();
    let declaring_type = type_name.to_string();
    let declaring_field = field.public_name.clone();
    let direction = relationship.direction;
    let foreign_key_path = relationship.foreign_key_path.clone();
    let cardinality = relationship.cardinality;
    let target_type = relationship.target_type.clone();

    let type_ref = match cardinality {
        Cardinality::One => TypeRef::named(target_type),
        Cardinality::Many => TypeRef::named_nn_list_nn(target_type),
    };

    Field::new(field_name, type_ref, move |ctx| {
        let declaring_type = declaring_type.clone();
        let declaring_field = declaring_field.clone();
        let foreign_key_path = foreign_key_path.clone();
        FieldFuture::new(async move {
            let doc = ctx.parent_value.try_downcast_ref::<Value>()?;
            let key_value = match direction {
                RelationshipDirection::Out => value_at(doc, &foreign_key_path),
                RelationshipDirection::In => value_at(doc, &FieldPath::single("id")),
            };
            if key_value.is_null() {
                return match cardinality {
                    Cardinality::One => Ok(None),
                    Cardinality::Many => Ok(Some(FieldValue::list(std::iter::empty()))),
                };
            }

            let filter = untyped_arg(&ctx, "filter");
            let key = RelationshipKey {
                type_name: declaring_type,
                field_name: declaring_field,
                filter_fingerprint: serde_json::to_string(&filter).unwrap_or_default(),
                key_fingerprint: serde_json::to_string(&key_value).unwrap_or_default(),
            };

            let loader = ctx.ctx.data::<Arc<DataLoader<RelationshipLoader>>>()?;
            let documents = loader
                .load_one(key)
                .await
                .map_err(|e| async_graphql::Error::new(e.to_string()))?
                .unwrap_or_default();

            match cardinality {
                Cardinality::One => Ok(documents.into_iter().next().map(FieldValue::owned_any)),
                Cardinality::Many => {
                    Ok(Some(FieldValue::list(documents.into_iter().map(FieldValue::owned_any))))
                }
            }
        })
    })
    .argument(InputValue::new("filter", TypeRef::named(scalars::UNTYPED)))
}

// --- relay document connection -----------------------------------------

fn build_connection_object(type_def: &TypeDef) -> Object {
    let edge_type = format!("{}Edge", type_def.name);
    Object::new(format!("{}Connection", type_def.name))
        .field(Field::new("edges", TypeRef::named_nn_list_nn(edge_type), |ctx| {
            FieldFuture::new(async move {
                let connection = ctx.parent_value.try_downcast_ref::<DocumentConnection>()?;
                Ok(Some(FieldValue::list(connection.edges.iter().cloned().map(FieldValue::owned_any))))
            })
        }))
        .field(Field::new("pageInfo", TypeRef::named_nn("PageInfo"), |ctx| {
            FieldFuture::new(async move {
                let connection = ctx.parent_value.try_downcast_ref::<DocumentConnection>()?;
                Ok(Some(FieldValue::owned_any(PageInfoView::from(connection))))
            })
        }))
        .field(Field::new("totalEdgeCount", TypeRef::named(scalars::JSON_SAFE_LONG), |ctx| {
            FieldFuture::new(async move {
                let connection = ctx.parent_value.try_downcast_ref::<DocumentConnection>()?;
                Ok(connection.total_edge_count.map(|n| FieldValue::value(json_number(n as i64))))
            })
        }))
}

fn build_edge_object(type_def: &TypeDef) -> Object {
    let node_type = type_def.name.clone();
    Object::new(format!("{}Edge", type_def.name))
        .field(Field::new("cursor", TypeRef::named_nn(scalars::CURSOR), |ctx| {
            FieldFuture::new(async move {
                let edge = ctx.parent_value.try_downcast_ref::<DocumentEdge>()?;
                Ok(Some(FieldValue::value(GraphqlValue::String(edge.cursor.clone()))))
            })
        }))
        .field(Field::new("node", TypeRef::named_nn(node_type), |ctx| {
            FieldFuture::new(async move {
                let edge = ctx.parent_value.try_downcast_ref::<DocumentEdge>()?;
                Ok(Some(FieldValue::owned_any(edge.node.clone())))
            })
        }))
}

fn build_root_connection_field(type_def: &TypeDef, index: &IndexDefinition) -> Field {
    let type_name = type_def.name.clone();
    let connection_type = format!("{}Connection", type_def.name);
    let index_logical_name = index.logical_name.clone();

    Field::new(
        root_connection_field_name(&type_name),
        TypeRef::named_nn(connection_type),
        move |ctx| {
            let type_name = type_name.clone();
            let index_logical_name = index_logical_name.clone();
            FieldFuture::new(async move {
                let schema = ctx.ctx.data::<Arc<SchemaView>>()?;
                let config = ctx.ctx.data::<Arc<GraphqlEngineConfig>>()?;
                let registry = ctx.ctx.data::<Arc<PlanRegistry>>()?;
                let rollover_cache = ctx.ctx.data::<Arc<datastore_client::RolloverCache>>().ok();

                let index_def = schema.get_index_definition(&index_logical_name).ok_or_else(|| {
                    EngineError::Invariant(format!("missing index definition '{index_logical_name}'"))
                })?;
                let cluster = index_def.query_cluster.clone().ok_or_else(|| {
                    EngineError::Invariant(format!("index '{index_logical_name}' has no query cluster"))
                })?;

                let args = parse_document_query_args(&ctx)?;
                let plan = build_document_query(
                    schema,
                    &type_name,
                    index_def,
                    rollover_cache.map(|c| c.as_ref().as_ref()),
                    config.timeout_in_ms,
                    config.default_page_size,
                    config.max_page_size,
                    args,
                )
                .await?;

                let wants_total = ctx.ctx.look_ahead().field("totalEdgeCount").exists();
                let handle: PlanHandle<RawHits> = registry.submit(cluster.clone(), plan.query.clone()).await;
                let total_handle: Option<PlanHandle<RawAggregation>> = if wants_total {
                    Some(registry.submit(cluster, build_count_query(&plan.query)).await)
                } else {
                    None
                };

                let hits = registry.resolve(handle).await?;
                let total_edge_count = match total_handle {
                    Some(handle) => {
                        let raw = registry.resolve(handle).await?;
                        raw.0.get("count").and_then(|c| c.get("doc_count")).and_then(Value::as_u64)
                    }
                    None => None,
                };

                let connection = build_document_connection(
                    hits.0,
                    &plan.sort,
                    plan.page_size,
                    plan.reverse,
                    plan.has_previous_page_hint,
                    total_edge_count,
                );
                Ok(Some(FieldValue::owned_any(connection)))
            })
        },
    )
    .argument(InputValue::new("filter", TypeRef::named(scalars::UNTYPED)))
    .argument(InputValue::new("sort", TypeRef::named(scalars::UNTYPED)))
    .argument(InputValue::new("first", TypeRef::named(TypeRef::INT)))
    .argument(InputValue::new("after", TypeRef::named(scalars::CURSOR)))
    .argument(InputValue::new("last", TypeRef::named(TypeRef::INT)))
    .argument(InputValue::new("before", TypeRef::named(scalars::CURSOR)))
}

fn build_count_query(query: &DatastoreQuery) -> DatastoreQuery {
    let mut count = query.clone();
    count.sort = vec![];
    count.pagination = Pagination::default();
    count.document_source = false;
    // `size` stays at the document query's own non-zero value rather than
    // 0 — `merge` compares `size`, so this keeps a plain count from
    // folding into a grouped aggregation's `size: 0` query (spec §4.4,
    // "query_count: 2"). `to_header_body` still renders `size: 0` on the
    // wire for any aggregation-only plan regardless of this field.
    count.aggregations = vec![AggregationNode::leaf("count")];
    count
}

fn parse_document_query_args(ctx: &ResolverContext<'_>) -> Result<DocumentQueryArgs, EngineError> {
    let sort_value = untyped_arg(ctx, "sort");
    let sort = if sort_value.is_null() { vec![] } else { parse_sort(&sort_value)? };
    Ok(DocumentQueryArgs {
        filter: untyped_arg(ctx, "filter"),
        sort,
        first: i64_arg(ctx, "first"),
        after: string_arg(ctx, "after"),
        last: i64_arg(ctx, "last"),
        before: string_arg(ctx, "before"),
    })
}

fn parse_sort(value: &Value) -> Result<Vec<SortKey>, EngineError> {
    let array = value.as_array().ok_or_else(|| EngineError::Validation("sort must be a list".to_string()))?;
    array
        .iter()
        .map(|entry| {
            let field = entry
                .get("field")
                .and_then(Value::as_str)
                .ok_or_else(|| EngineError::Validation("sort entry missing 'field'".to_string()))?;
            let order = match entry.get("order").and_then(Value::as_str) {
                Some("DESC") => SortOrder::Desc,
                _ => SortOrder::Asc,
            };
            Ok(SortKey { field: FieldPath::single(field), order })
        })
        .collect()
}

// --- aggregation tree (generic across every type) -----------------------

fn build_root_aggregation_field(type_def: &TypeDef) -> Field {
    let type_name = type_def.name.clone();
    Field::new(
        root_aggregation_field_name(&type_name),
        TypeRef::named_nn("AggregationConnection"),
        move |ctx| {
            let type_name = type_name.clone();
            FieldFuture::new(async move {
                let schema = ctx.ctx.data::<Arc<SchemaView>>()?;
                let config = ctx.ctx.data::<Arc<GraphqlEngineConfig>>()?;
                let registry = ctx.ctx.data::<Arc<PlanRegistry>>()?;
                let rollover_cache = ctx.ctx.data::<Arc<datastore_client::RolloverCache>>().ok();

                let filter = untyped_arg(&ctx, "filter");
                let grouped_by = untyped_arg(&ctx, "groupedBy");
                let aggregated_values = untyped_arg(&ctx, "aggregatedValues");
                let sub_aggregations = untyped_arg(&ctx, "subAggregations");
                let first = i64_arg(&ctx, "first");
                let after = string_arg(&ctx, "after");

                let node = build_aggregation_node(
                    schema,
                    &type_name,
                    "root",
                    &filter,
                    &grouped_by,
                    &aggregated_values,
                    &sub_aggregations,
                )?;

                let type_def = schema
                    .get_type(&type_name)
                    .ok_or_else(|| EngineError::Invariant(format!("unknown type '{type_name}'")))?;
                let index_name = type_def.backing_index.as_deref().ok_or_else(|| {
                    EngineError::Invariant(format!("type '{type_name}' has no backing index"))
                })?;
                let index = schema.get_index_definition(index_name).ok_or_else(|| {
                    EngineError::Invariant(format!("missing index definition '{index_name}'"))
                })?;
                let cluster = index.query_cluster.clone().ok_or_else(|| {
                    EngineError::Invariant(format!("index '{index_name}' has no query cluster"))
                })?;

                let filter_outcome = node.filter.clone().map(FilterOutcome::Node).unwrap_or(FilterOutcome::True);
                let index_target = match crate::query_builder::prune_rollover(
                    index,
                    &filter_outcome,
                    rollover_cache.map(|c| c.as_ref().as_ref()),
                )
                .await?
                {
                    Some(target) => target,
                    None => IndexTarget::Glob(index.index_pattern()),
                };

                let query = DatastoreQuery {
                    index_target,
                    routing: RoutingSet::All,
                    filter: filter_outcome,
                    sort: vec![],
                    pagination: Pagination::default(),
                    aggregations: vec![node.clone()],
                    document_source: false,
                    size: 0,
                    timeout_ms_share: config.timeout_in_ms,
                    search_preference: None,
                };

                let handle: PlanHandle<RawAggregation> = registry.submit(cluster, query).await;
                let raw = registry.resolve(handle).await?;

                let decoded = match config.sub_aggregation_grouping_adapter {
                    GroupingAdapterKind::Composite => decode_aggregations(&[node], &CompositeAdapter, &raw.0),
                    GroupingAdapterKind::NonComposite => {
                        decode_aggregations(&[node], &NonCompositeAdapter, &raw.0)
                    }
                }
                .map_err(EngineError::from)?;

                let (alias, buckets) = decoded
                    .into_iter()
                    .next()
                    .ok_or_else(|| EngineError::Invariant("aggregation response missing root alias".to_string()))?;
                let more_buckets_upstream = composite_after_key_present(&raw.0, &alias);

                let connection = connection_from_buckets(buckets, first, after.as_deref(), more_buckets_upstream)?;
                Ok(Some(FieldValue::owned_any(connection)))
            })
        },
    )
    .argument(InputValue::new("filter", TypeRef::named(scalars::UNTYPED)))
    .argument(InputValue::new("groupedBy", TypeRef::named(scalars::UNTYPED)))
    .argument(InputValue::new("aggregatedValues", TypeRef::named(scalars::UNTYPED)))
    .argument(InputValue::new("subAggregations", TypeRef::named(scalars::UNTYPED)))
    .argument(InputValue::new("first", TypeRef::named(TypeRef::INT)))
    .argument(InputValue::new("after", TypeRef::named(scalars::CURSOR)))
}

/// `sub_buckets` carries no per-child alias once decoded (spec §4.3's
/// `decode_children` flattens every `sub_aggregations` child into one
/// list) — a single nested `subAggregations` connection is the most this
/// layer can expose faithfully without re-deriving alias boundaries that
/// the decode step has already discarded (see DESIGN.md).
fn connection_from_buckets(
    buckets: Vec<query_planner::DecodedBucket>,
    first: Option<i64>,
    after: Option<&str>,
    more_buckets_upstream: bool,
) -> Result<AggregationConnection, EngineError> {
    if buckets.len() == 1 && buckets[0].grouping_key.is_empty() {
        build_ungrouped_connection(buckets.into_iter().next().expect("len checked above"), first)
    } else {
        build_grouped_connection(buckets, first, after, more_buckets_upstream)
    }
}

fn build_aggregation_connection_object() -> Object {
    Object::new("AggregationConnection")
        .field(Field::new("edges", TypeRef::named_nn_list_nn("AggregationEdge"), |ctx| {
            FieldFuture::new(async move {
                let connection = ctx.parent_value.try_downcast_ref::<AggregationConnection>()?;
                Ok(Some(FieldValue::list(connection.edges.iter().cloned().map(FieldValue::owned_any))))
            })
        }))
        .field(Field::new("pageInfo", TypeRef::named_nn("PageInfo"), |ctx| {
            FieldFuture::new(async move {
                let connection = ctx.parent_value.try_downcast_ref::<AggregationConnection>()?;
                Ok(Some(FieldValue::owned_any(PageInfoView::from(connection))))
            })
        }))
}

fn build_aggregation_edge_object() -> Object {
    Object::new("AggregationEdge")
        .field(Field::new("cursor", TypeRef::named_nn(scalars::CURSOR), |ctx| {
            FieldFuture::new(async move {
                let edge = ctx.parent_value.try_downcast_ref::<AggregationEdge>()?;
                Ok(Some(FieldValue::value(GraphqlValue::String(edge.cursor.clone()))))
            })
        }))
        .field(Field::new("groupedBy", TypeRef::named_nn_list_nn(scalars::UNTYPED), |ctx| {
            FieldFuture::new(async move {
                let edge = ctx.parent_value.try_downcast_ref::<AggregationEdge>()?;
                Ok(Some(FieldValue::list(
                    edge.grouped_by.iter().map(|v| FieldValue::value(scalars::untyped_to_graphql(v))),
                )))
            })
        }))
        .field(Field::new("count", TypeRef::named_nn(scalars::JSON_SAFE_LONG), |ctx| {
            FieldFuture::new(async move {
                let edge = ctx.parent_value.try_downcast_ref::<AggregationEdge>()?;
                Ok(Some(FieldValue::value(json_number(edge.count as i64))))
            })
        }))
        .field(Field::new("countDetail", TypeRef::named_nn("CountDetail"), |ctx| {
            FieldFuture::new(async move {
                let edge = ctx.parent_value.try_downcast_ref::<AggregationEdge>()?;
                Ok(Some(FieldValue::owned_any(edge.count_detail)))
            })
        }))
        .field(Field::new("aggregatedValues", TypeRef::named(scalars::UNTYPED), |ctx| {
            FieldFuture::new(async move {
                let edge = ctx.parent_value.try_downcast_ref::<AggregationEdge>()?;
                let map: serde_json::Map<String, Value> = edge.aggregated_values.iter().cloned().collect();
                Ok(Some(FieldValue::value(scalars::untyped_to_graphql(&Value::Object(map)))))
            })
        }))
        .field(
            Field::new("subAggregations", TypeRef::named_nn("AggregationConnection"), |ctx| {
                FieldFuture::new(async move {
                    let edge = ctx.parent_value.try_downcast_ref::<AggregationEdge>()?;
                    let first = i64_arg(&ctx, "first");
                    let after = string_arg(&ctx, "after");
                    // No raw response survives to this point (`edge` only carries
                    // already-decoded buckets), so the composite `after_key` signal
                    // isn't available here; `subAggregations` pagination relies on
                    // local truncation alone, same as before this fix.
                    let connection = connection_from_buckets(edge.sub_buckets.clone(), first, after.as_deref(), false)?;
                    Ok(Some(FieldValue::owned_any(connection)))
                })
            })
            .argument(InputValue::new("first", TypeRef::named(TypeRef::INT)))
            .argument(InputValue::new("after", TypeRef::named(scalars::CURSOR))),
        )
}

fn build_count_detail_object() -> Object {
    Object::new("CountDetail")
        .field(Field::new("approximateValue", TypeRef::named_nn(scalars::JSON_SAFE_LONG), |ctx| {
            FieldFuture::new(async move {
                let detail = ctx.parent_value.try_downcast_ref::<CountDetail>()?;
                Ok(Some(FieldValue::value(json_number(detail.approximate_value as i64))))
            })
        }))
        .field(Field::new("exactValue", TypeRef::named(scalars::JSON_SAFE_LONG), |ctx| {
            FieldFuture::new(async move {
                let detail = ctx.parent_value.try_downcast_ref::<CountDetail>()?;
                Ok(detail.exact_value.map(|v| FieldValue::value(json_number(v as i64))))
            })
        }))
        .field(Field::new("upperBound", TypeRef::named_nn(scalars::JSON_SAFE_LONG), |ctx| {
            FieldFuture::new(async move {
                let detail = ctx.parent_value.try_downcast_ref::<CountDetail>()?;
                Ok(Some(FieldValue::value(json_number(detail.upper_bound as i64))))
            })
        }))
}

fn build_page_info_object() -> Object {
    Object::new("PageInfo")
        .field(Field::new("hasNextPage", TypeRef::named_nn(TypeRef::BOOLEAN), |ctx| {
            FieldFuture::new(async move {
                let info = ctx.parent_value.try_downcast_ref::<PageInfoView>()?;
                Ok(Some(FieldValue::value(GraphqlValue::Boolean(info.has_next_page))))
            })
        }))
        .field(Field::new("hasPreviousPage", TypeRef::named_nn(TypeRef::BOOLEAN), |ctx| {
            FieldFuture::new(async move {
                let info = ctx.parent_value.try_downcast_ref::<PageInfoView>()?;
                Ok(Some(FieldValue::value(GraphqlValue::Boolean(info.has_previous_page))))
            })
        }))
        .field(Field::new("startCursor", TypeRef::named(scalars::CURSOR), |ctx| {
            FieldFuture::new(async move {
                let info = ctx.parent_value.try_downcast_ref::<PageInfoView>()?;
                Ok(info.start_cursor.clone().map(|c| FieldValue::value(GraphqlValue::String(c))))
            })
        }))
        .field(Field::new("endCursor", TypeRef::named(scalars::CURSOR), |ctx| {
            FieldFuture::new(async move {
                let info = ctx.parent_value.try_downcast_ref::<PageInfoView>()?;
                Ok(info.end_cursor.clone().map(|c| FieldValue::value(GraphqlValue::String(c))))
            })
        }))
}

#[derive(Debug, Clone)]
struct PageInfoView {
    has_next_page: bool,
    has_previous_page: bool,
    start_cursor: Option<String>,
    end_cursor: Option<String>,
}

impl From<&DocumentConnection> for PageInfoView {
    fn from(connection: &DocumentConnection) -> Self {
        Self {
            has_next_page: connection.has_next_page,
            has_previous_page: connection.has_previous_page,
            start_cursor: connection.start_cursor.clone(),
            end_cursor: connection.end_cursor.clone(),
        }
    }
}

impl From<&AggregationConnection> for PageInfoView {
    fn from(connection: &AggregationConnection) -> Self {
        Self {
            has_next_page: connection.has_next_page,
            has_previous_page: connection.has_previous_page,
            start_cursor: connection.start_cursor.clone(),
            end_cursor: connection.end_cursor.clone(),
        }
    }
}

// --- relationship batching ----------------------------------------------

/// One batchable relationship hop: every sibling parent resolving the same
/// field with the same `filter` argument shares one `DatastoreQuery`
/// (spec §4.6's fan-out bound), scoped through `async_graphql::dataloader`
/// rather than the `PlanRegistry`'s own wave collection since the registry
/// has no notion of "siblings" below the root selection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationshipKey {
    pub type_name: String,
    pub field_name: String,
    pub filter_fingerprint: String,
    pub key_fingerprint: String,
}

pub struct RelationshipLoader {
    schema: Arc<SchemaView>,
    registry: Arc<PlanRegistry>,
    config: Arc<GraphqlEngineConfig>,
}

impl RelationshipLoader {
    pub fn new(schema: Arc<SchemaView>, registry: Arc<PlanRegistry>, config: Arc<GraphqlEngineConfig>) -> Self {
        Self { schema, registry, config }
    }
}

fn stub_path(relationship: &Relationship) -> FieldPath {
    match relationship.direction {
        RelationshipDirection::Out => relationship.foreign_key_path.clone(),
        RelationshipDirection::In => FieldPath::single("id"),
    }
}

fn stub_document(path: &FieldPath, value: Value) -> Value {
    let mut segments: Vec<String> = path.segments().to_vec();
    let leaf = segments.pop().unwrap_or_else(|| "id".to_string());
    let mut current = {
        let mut obj = serde_json::Map::new();
        obj.insert(leaf, value);
        Value::Object(obj)
    };
    for segment in segments.into_iter().rev() {
        let mut obj = serde_json::Map::new();
        obj.insert(segment, current);
        current = Value::Object(obj);
    }
    current
}

fn relationship_matches(doc: &Value, relationship: &Relationship, key_value: &Value) -> bool {
    match relationship.direction {
        RelationshipDirection::Out => doc.get("id").unwrap_or(&Value::Null) == key_value,
        RelationshipDirection::In => &value_at(doc, &relationship.foreign_key_path) == key_value,
    }
}

#[async_trait]
impl Loader<RelationshipKey> for RelationshipLoader {
    type Value = Vec<Value>;
    type Error = Arc<EngineError>;

    async fn load(&self, keys: &[RelationshipKey]) -> Result<HashMap<RelationshipKey, Self::Value>, Self::Error> {
        let mut groups: HashMap<(String, String, String), Vec<&RelationshipKey>> = HashMap::new();
        for key in keys {
            groups
                .entry((key.type_name.clone(), key.field_name.clone(), key.filter_fingerprint.clone()))
                .or_default()
                .push(key);
        }

        let mut pending = Vec::new();
        for ((type_name, field_name, filter_fingerprint), group_keys) in &groups {
            let field = self
                .schema
                .field(type_name, field_name)
                .map_err(EngineError::from)
                .map_err(Arc::new)?;
            let relationship = field.relationship.as_ref().ok_or_else(|| {
                Arc::new(EngineError::Invariant(format!("field '{field_name}' on '{type_name}' has no relationship")))
            })?;
            let target = self.schema.get_type(&relationship.target_type).ok_or_else(|| {
                Arc::new(EngineError::Invariant(format!("unknown relationship target '{}'", relationship.target_type)))
            })?;
            let index_name = target.backing_index.as_deref().ok_or_else(|| {
                Arc::new(EngineError::Invariant(format!("type '{}' has no backing index", relationship.target_type)))
            })?;
            let index = self.schema.get_index_definition(index_name).ok_or_else(|| {
                Arc::new(EngineError::Invariant(format!("missing index definition '{index_name}'")))
            })?;
            let cluster = index.query_cluster.clone().ok_or_else(|| {
                Arc::new(EngineError::Invariant(format!("index '{index_name}' has no query cluster")))
            })?;

            let filter: Value = serde_json::from_str(filter_fingerprint).unwrap_or(Value::Null);
            let path = stub_path(relationship);
            let parent_documents: Vec<Value> = group_keys
                .iter()
                .map(|key| {
                    let value: Value = serde_json::from_str(&key.key_fingerprint).unwrap_or(Value::Null);
                    stub_document(&path, value)
                })
                .collect();

            let query = plan_relationship_query(
                &self.schema,
                relationship,
                index,
                &parent_documents,
                &filter,
                self.config.effective_page_size(None),
            )
            .map_err(Arc::new)?;

            let handle: PlanHandle<RawHits> = self.registry.submit(cluster, query).await;
            pending.push((type_name.clone(), field_name.clone(), filter_fingerprint.clone(), relationship.clone(), handle));
        }

        let mut out = HashMap::new();
        for (type_name, field_name, filter_fingerprint, relationship, handle) in pending {
            let hits = self.registry.resolve(handle).await.map_err(Arc::new)?;
            let documents = retain_primary_source(hits.0);
            if let Some(group_keys) = groups.get(&(type_name, field_name, filter_fingerprint)) {
                for key in group_keys {
                    let key_value: Value = serde_json::from_str(&key.key_fingerprint).unwrap_or(Value::Null);
                    let matched: Vec<Value> = documents
                        .iter()
                        .filter(|doc| relationship_matches(doc, &relationship, &key_value))
                        .cloned()
                        .collect();
                    out.insert((*key).clone(), matched);
                }
            }
        }
        Ok(out)
    }
}

// --- naming + argument helpers -------------------------------------------

fn root_connection_field_name(type_name: &str) -> String {
    format!("{}s", lower_first(type_name))
}

fn root_aggregation_field_name(type_name: &str) -> String {
    format!("{}_aggregations", to_snake_case(type_name))
}

fn lower_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) => c.to_lowercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn to_snake_case(name: &str) -> String {
    let mut out = String::new();
    for (i, ch) in name.char_indices() {
        if ch.is_uppercase() {
            if i != 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

fn json_number(value: i64) -> GraphqlValue {
    GraphqlValue::from_json(serde_json::json!(value)).unwrap_or(GraphqlValue::Null)
}

fn untyped_arg(ctx: &ResolverContext<'_>, name: &str) -> Value {
    ctx.args.get(name).map(|v| scalars::untyped_from_graphql(v.as_value())).unwrap_or(Value::Null)
}

fn string_arg(ctx: &ResolverContext<'_>, name: &str) -> Option<String> {
    ctx.args.get(name).and_then(|v| v.string().ok()).map(str::to_string)
}

fn i64_arg(ctx: &ResolverContext<'_>, name: &str) -> Option<i64> {
    ctx.args.get(name).and_then(|v| v.i64().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_connection_field_name_lowercases_and_pluralizes() {
        assert_eq!(root_connection_field_name("Widget"), "widgets");
    }

    #[test]
    fn root_aggregation_field_name_snake_cases_multi_word_types() {
        assert_eq!(root_aggregation_field_name("WidgetPart"), "widget_part_aggregations");
    }

    #[test]
    fn stub_document_nests_multi_segment_foreign_key_paths() {
        let path = FieldPath::from_segments(vec!["owner".to_string(), "id".to_string()]);
        let doc = stub_document(&path, Value::String("m1".to_string()));
        assert_eq!(doc["owner"]["id"], Value::String("m1".to_string()));
    }
}
