//! FT.* command handlers
//!
//! Each handler parses its arguments synchronously, dispatches one hop
//! through the shard set, merges the per-shard results and shapes the
//! reply. The query string is parsed exactly once per command and shared
//! read-only with every shard callback.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use std::sync::Arc;

use tracing::warn;

use crate::aggregate::{self, Reducer, ReducerFunc, SortField, SortParams, Step};
use crate::command::{ArgParser, CommandContext};
use crate::datastore::Datastore;
use crate::doc::json_path_valid;
use crate::doc_index::{DocIndexInfo, ShardDocIndex};
use crate::error::{Result, SearchError};
use crate::query::QueryParams;
use crate::reply::Reply;
use crate::schema::{
    DocKind, FieldParams, FieldSpec, FieldType, IndexDefinition, NumericParams, Schema, TagParams,
    TextParams, VectorAlgo, VectorParams,
};
use crate::search::{
    compare_sortable, FieldReference, KnnScoreSortOption, SearchAlgorithm, SearchParams,
    SerializedSearchDoc, ShardSearchResult, SortOption, SortOrder, SortableValue,
};
use crate::distance::VectorMetric;

// Field options accepted for compatibility but not implemented; each is
// logged once.
const IGNORED_OPTIONS: [&str; 4] = ["UNF", "NOSTEM", "INDEXMISSING", "INDEXEMPTY"];
const IGNORED_OPTIONS_WITH_ARG: [&str; 2] = ["WEIGHT", "PHONETIC"];

fn warn_ignored_option(option: &str) {
    static WARNED: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    let warned = WARNED.get_or_init(|| Mutex::new(HashSet::new()));
    let mut guard = match warned.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if guard.insert(option.to_ascii_uppercase()) {
        warn!("Ignoring unsupported field option in FT.CREATE: {option}");
    }
}

// ---- schema parsing ----

fn parse_tag_params(parser: &mut ArgParser) -> Result<TagParams> {
    let mut params = TagParams::default();
    loop {
        if parser.check("SEPARATOR") {
            let separator = parser.next_str()?;
            let mut chars = separator.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => params.separator = c,
                _ => {
                    return Err(SearchError::syntax(format!(
                        "Tag separator must be a single character. Got `{separator}`"
                    )))
                }
            }
            continue;
        }
        if parser.check("CASESENSITIVE") {
            params.case_sensitive = true;
            continue;
        }
        if parser.check("WITHSUFFIXTRIE") {
            params.with_suffixtrie = true;
            continue;
        }
        break;
    }
    Ok(params)
}

fn parse_text_params(parser: &mut ArgParser) -> Result<TextParams> {
    Ok(TextParams {
        with_suffixtrie: parser.check("WITHSUFFIXTRIE"),
    })
}

fn parse_numeric_params(parser: &mut ArgParser) -> Result<NumericParams> {
    let mut params = NumericParams::default();
    if parser.check("BLOCKSIZE") {
        params.block_size = parser.next_num()?;
    }
    Ok(params)
}

// {HNSW|FLAT} num_args [DIM d] [DISTANCE_METRIC m] ...
fn parse_vector_params(parser: &mut ArgParser) -> Result<VectorParams> {
    let mut params = VectorParams::default();
    params.algo = if parser.check("HNSW") {
        VectorAlgo::Hnsw
    } else if parser.check("FLAT") {
        VectorAlgo::Flat
    } else {
        return Err(SearchError::syntax("Parse error of vector parameters"));
    };

    let num_args: usize = parser.next_num()?;
    let mut parsed = 0;
    while parser.has_next() && parsed * 2 < num_args {
        if parser.check("DIM") {
            params.dim = parser.next_num()?;
        } else if parser.check("DISTANCE_METRIC") {
            params.metric = if parser.check("L2") {
                VectorMetric::L2
            } else if parser.check("IP") {
                VectorMetric::Ip
            } else if parser.check("COSINE") {
                VectorMetric::Cosine
            } else {
                return Err(SearchError::syntax("Parse error of vector parameters"));
            };
        } else if parser.check("INITIAL_CAP") {
            params.capacity = parser.next_num()?;
        } else if parser.check("M") {
            params.hnsw_m = parser.next_num()?;
        } else if parser.check("EF_CONSTRUCTION") {
            params.hnsw_ef_construction = parser.next_num()?;
        } else if parser.check("EF_RUNTIME") {
            parser.next_num::<usize>()?;
            warn!("EF_RUNTIME not supported");
        } else if parser.check("EPSILON") {
            parser.next_num::<f64>()?;
            warn!("EPSILON not supported");
        } else {
            parser.skip(2);
        }
        parsed += 1;
    }

    if params.dim == 0 {
        return Err(SearchError::syntax("Knn vector dimension cannot be zero"));
    }
    Ok(params)
}

// SCHEMA field [AS alias] type [params...] [SORTABLE] [NOINDEX] ...
fn parse_schema(parser: &mut ArgParser, kind: DocKind, schema: &mut Schema) -> Result<()> {
    if !parser.has_next() {
        return Err(SearchError::syntax("Fields arguments are missing"));
    }

    while parser.has_next() {
        let field = parser.next_string()?;
        if kind == DocKind::Json && !json_path_valid(&field) {
            return Err(SearchError::syntax(format!("Bad json path: {field}")));
        }

        let mut alias = field.clone();
        if parser.check("AS") {
            alias = parser.next_string()?;
        }

        let (field_type, params) = if parser.check("TAG") {
            (FieldType::Tag, FieldParams::Tag(parse_tag_params(parser)?))
        } else if parser.check("TEXT") {
            (FieldType::Text, FieldParams::Text(parse_text_params(parser)?))
        } else if parser.check("NUMERIC") {
            (
                FieldType::Numeric,
                FieldParams::Numeric(parse_numeric_params(parser)?),
            )
        } else if parser.check("VECTOR") {
            (
                FieldType::Vector,
                FieldParams::Vector(parse_vector_params(parser)?),
            )
        } else {
            let token = parser.next_str().unwrap_or("");
            return Err(SearchError::syntax(format!(
                "Field type {token} is not supported"
            )));
        };

        // Flags: the known tables are checked before the tolerated
        // unknown options so typos of supported flags still fail
        let mut flags = 0u8;
        while let Some(option) = parser.peek_str() {
            if option.eq_ignore_ascii_case("NOINDEX") {
                flags |= FieldSpec::NOINDEX;
                parser.skip(1);
            } else if option.eq_ignore_ascii_case("SORTABLE") {
                flags |= FieldSpec::SORTABLE;
                parser.skip(1);
            } else if IGNORED_OPTIONS
                .iter()
                .any(|o| option.eq_ignore_ascii_case(o))
            {
                warn_ignored_option(option);
                parser.skip(1);
            } else if IGNORED_OPTIONS_WITH_ARG
                .iter()
                .any(|o| option.eq_ignore_ascii_case(o))
            {
                warn_ignored_option(option);
                parser.skip(2);
            } else {
                break;
            }
        }

        schema.add_field(
            field,
            FieldSpec {
                alias,
                field_type,
                flags,
                params,
            },
        )?;
    }
    Ok(())
}

fn parse_create_params(parser: &mut ArgParser) -> Result<IndexDefinition> {
    let mut index = IndexDefinition::default();

    while parser.has_next() {
        if parser.check("ON") {
            index.doc_kind = Some(if parser.check("HASH") {
                DocKind::Hash
            } else if parser.check("JSON") {
                DocKind::Json
            } else {
                return Err(SearchError::syntax("expected HASH or JSON"));
            });
        } else if parser.check("PREFIX") {
            if !parser.check("1") {
                return Err(SearchError::syntax("Multiple prefixes are not supported"));
            }
            index.prefix = parser.next_string()?;
        } else if parser.check("STOPWORDS") {
            let count: usize = parser.next_num()?;
            index.stopwords.clear();
            for _ in 0..count {
                index.stopwords.insert(parser.next_str()?.to_lowercase());
            }
        } else if parser.check("SCHEMA") {
            parse_schema(parser, index.kind(), &mut index.schema)?;
        } else {
            // Unsupported parameters are ignored for now
            parser.skip(1);
        }
    }
    Ok(index)
}

// ---- search argument parsing ----

fn strip_at(field: &str) -> &str {
    field.strip_prefix('@').unwrap_or(field)
}

/// Field that must start with '@' unless the legacy toggle allows it.
fn parse_field_with_at_sign<'a>(
    parser: &mut ArgParser<'a>,
    reject_legacy: bool,
) -> Result<Option<&'a str>> {
    let field = parser.next_str()?;
    match field.strip_prefix('@') {
        Some(stripped) => Ok(Some(stripped)),
        None if reject_legacy => Ok(None),
        None => Ok(Some(field)),
    }
}

fn parse_load_or_return_fields(parser: &mut ArgParser, is_load: bool) -> Result<Vec<FieldReference>> {
    let num_fields: usize = parser.next_num()?;
    let mut fields = Vec::with_capacity(num_fields);
    for _ in 0..num_fields {
        if !parser.has_next() {
            break;
        }
        let raw = parser.next_str()?;
        let field = if is_load { strip_at(raw) } else { raw };
        let mut reference = FieldReference::new(field);
        if parser.check("AS") {
            reference.alias = Some(parser.next_string()?);
        }
        fields.push(reference);
    }
    Ok(fields)
}

// PARAMS num name value [name value ...]
fn parse_query_params(parser: &mut ArgParser) -> Result<QueryParams> {
    let mut params = QueryParams::default();
    let num_args: usize = parser.next_num()?;
    while parser.has_next() && params.len() * 2 < num_args {
        let name = parser.next_string()?;
        let value = parser.next()?.to_vec();
        params.insert(name, value);
    }
    Ok(params)
}

fn parse_search_params(parser: &mut ArgParser) -> Result<SearchParams> {
    let mut params = SearchParams::default();

    while parser.has_next() {
        if parser.check("LIMIT") {
            params.limit_offset = parser.next_num()?;
            params.limit_total = parser.next_num()?;
        } else if parser.check("LOAD") {
            if params.return_fields.is_some() {
                return Err(SearchError::syntax("LOAD cannot be applied after RETURN"));
            }
            params.load_fields = Some(parse_load_or_return_fields(parser, true)?);
        } else if parser.check("RETURN") {
            if params.load_fields.is_some() {
                return Err(SearchError::syntax("RETURN cannot be applied after LOAD"));
            }
            let fields = parse_load_or_return_fields(parser, false)?;
            // After NOCONTENT, RETURN is silently ignored
            if params.return_fields.is_none() {
                params.return_fields = Some(fields);
            }
        } else if parser.check("NOCONTENT") {
            params.return_fields = Some(Vec::new());
        } else if parser.check("PARAMS") {
            params.query_params = parse_query_params(parser)?;
        } else if parser.check("SORTBY") {
            let field = strip_at(parser.next_str()?).to_string();
            let order = if parser.check("DESC") {
                SortOrder::Desc
            } else {
                parser.check("ASC");
                SortOrder::Asc
            };
            params.sort_option = Some(SortOption { field, order });
        } else {
            // Unsupported parameters are ignored for now
            parser.skip(1);
        }
    }
    Ok(params)
}

// ---- aggregate argument parsing ----

struct AggregateParams {
    index: String,
    query: String,
    params: QueryParams,
    load_fields: Vec<FieldReference>,
    steps: Vec<Step>,
}

fn parse_aggregator_sort_params(parser: &mut ArgParser, reject_legacy: bool) -> Result<SortParams> {
    let mut strings_num: usize = parser.next_num()?;

    let mut sort_params = SortParams::default();
    sort_params.fields.reserve(strings_num / 2);

    while parser.has_next() && strings_num > 0 {
        let potential = parser.peek_str().unwrap_or_default().to_string();
        let Some(field) = parse_field_with_at_sign(parser, reject_legacy)? else {
            return Err(SearchError::syntax(format!(
                "SORTBY field name '{potential}' must start with '@'"
            )));
        };
        let field = field.to_string();
        strings_num -= 1;

        let mut order = SortOrder::Asc;
        if strings_num > 0 {
            if parser.check("ASC") {
                strings_num -= 1;
            } else if parser.check("DESC") {
                order = SortOrder::Desc;
                strings_num -= 1;
            }
        }
        sort_params.fields.push(SortField { field, order });
    }

    if strings_num > 0 {
        return Err(SearchError::syntax(
            "bad arguments for SORTBY: specified invalid number of strings",
        ));
    }

    if parser.check("MAX") {
        sort_params.max = Some(parser.next_num()?);
    }
    Ok(sort_params)
}

fn parse_aggregator_params(parser: &mut ArgParser, reject_legacy: bool) -> Result<AggregateParams> {
    let index = parser.next_string()?;
    let query = parser.next_string()?;

    let mut params = AggregateParams {
        index,
        query,
        params: QueryParams::default(),
        load_fields: Vec::new(),
        steps: Vec::new(),
    };

    // LOAD clauses come before any transforming step
    while parser.has_next() && parser.check("LOAD") {
        params
            .load_fields
            .extend(parse_load_or_return_fields(parser, true)?);
    }

    while parser.has_next() {
        if parser.check("GROUPBY") {
            let num_fields: usize = parser.next_num()?;
            let mut fields = Vec::with_capacity(num_fields);
            for _ in 0..num_fields {
                if !parser.has_next() {
                    break;
                }
                let Some(field) = parse_field_with_at_sign(parser, reject_legacy)? else {
                    return Err(SearchError::syntax(
                        "bad arguments: Field name should start with '@'",
                    ));
                };
                fields.push(field.to_string());
            }

            let mut reducers = Vec::new();
            while parser.check("REDUCE") {
                let func = if parser.check("COUNT") {
                    ReducerFunc::Count
                } else if parser.check("COUNT_DISTINCT") {
                    ReducerFunc::CountDistinct
                } else if parser.check("SUM") {
                    ReducerFunc::Sum
                } else if parser.check("AVG") {
                    ReducerFunc::Avg
                } else if parser.check("MAX") {
                    ReducerFunc::Max
                } else if parser.check("MIN") {
                    ReducerFunc::Min
                } else {
                    let token = parser.next_str().unwrap_or("");
                    return Err(SearchError::syntax(format!(
                        "reducer function {token} not found"
                    )));
                };

                let nargs: usize = parser.next_num()?;
                let mut source_field = String::new();
                if nargs > 0 {
                    source_field = strip_at(parser.next_str()?).to_string();
                }
                parser.expect_tag("AS")?;
                let result_field = parser.next_string()?;
                reducers.push(Reducer {
                    source_field,
                    result_field,
                    func,
                });
            }

            params.steps.push(Step::Group { fields, reducers });
            continue;
        }

        if parser.check("SORTBY") {
            let sort_params = parse_aggregator_sort_params(parser, reject_legacy)?;
            params.steps.push(Step::Sort(sort_params));
            continue;
        }

        if parser.check("LIMIT") {
            let offset: usize = parser.next_num()?;
            let num: usize = parser.next_num()?;
            params.steps.push(Step::Limit { offset, num });
            continue;
        }

        if parser.check("PARAMS") {
            params.params = parse_query_params(parser)?;
            continue;
        }

        if parser.check("LOAD") {
            return Err(SearchError::syntax(
                "LOAD cannot be applied after projectors or reducers",
            ));
        }

        let token = parser.peek_str().unwrap_or_default();
        return Err(SearchError::syntax(format!("Unknown clause: {token}")));
    }

    Ok(params)
}

// ---- reply shaping ----

fn sortable_value_reply(value: &SortableValue) -> Reply {
    match value {
        SortableValue::Null => Reply::Null,
        SortableValue::Double(d) => Reply::Double(*d),
        SortableValue::Str(s) => Reply::bulk(s.as_str()),
    }
}

/// Merge per-shard results into the final FT.SEARCH reply: KNN reorder
/// and cut first, then SORTBY, then the LIMIT window.
fn search_reply(
    params: &SearchParams,
    knn_sort_option: Option<KnnScoreSortOption>,
    results: Vec<ShardSearchResult>,
) -> Reply {
    let mut total_hits = 0;
    let mut docs: Vec<SerializedSearchDoc> = Vec::new();
    for shard_result in results {
        total_hits += shard_result.total_hits;
        docs.extend(shard_result.docs);
    }

    // Reorder and cut KNN results before applying SORT and LIMIT
    let mut knn_score_ret_field = None;
    let mut ignore_sort = false;
    if let Some(knn) = &knn_sort_option {
        total_hits = total_hits.min(knn.limit);
        docs.sort_by(|a, b| a.knn_score.total_cmp(&b.knn_score));
        docs.truncate(knn.limit);

        ignore_sort = params
            .sort_option
            .as_ref()
            .map(|sort| sort.field == knn.score_field_alias && sort.order == SortOrder::Asc)
            .unwrap_or(true);
        if params.should_return_field(&knn.score_field_alias) {
            knn_score_ret_field = Some(knn.score_field_alias.clone());
        }
    }

    let offset = params.limit_offset.min(docs.len());
    let limit = (docs.len() - offset).min(params.limit_total);

    // Apply SORTBY when it differs from the KNN ordering
    if let Some(sort) = &params.sort_option {
        if !ignore_sort {
            docs.sort_by(|a, b| compare_sortable(&a.sort_score, &b.sort_score, sort.order));
        }
    }

    let ids_only = params.ids_only();
    let mut items = Vec::with_capacity(if ids_only { limit + 1 } else { limit * 2 + 1 });
    items.push(Reply::Long(total_hits as i64));
    for doc in docs.drain(..).skip(offset).take(limit) {
        if ids_only {
            items.push(Reply::bulk(doc.key));
            continue;
        }
        let mut values = doc.values;
        if let Some(score_field) = &knn_score_ret_field {
            values.retain(|(name, _)| name != score_field);
            values.push((score_field.clone(), SortableValue::Double(doc.knn_score)));
        }
        items.push(Reply::bulk(doc.key));
        items.push(Reply::Map(
            values
                .into_iter()
                .map(|(name, value)| (Reply::bulk(name), sortable_value_reply(&value)))
                .collect(),
        ));
    }
    Reply::Array(items)
}

// ---- handlers ----

pub fn ft_create(ds: &Datastore, ctx: &CommandContext, args: &[Vec<u8>]) -> Result<Reply> {
    SearchAlgorithm::warmup();

    if ctx.db_index != 0 {
        return Err(SearchError::InvalidArgument(
            "Cannot create index on db != 0".to_string(),
        ));
    }

    let mut parser = ArgParser::new(args);
    let name = parser.next_string()?;
    let definition = Arc::new(parse_create_params(&mut parser)?);

    // The index exists on every shard or on none
    let exists = ds
        .shards()
        .single_hop({
            let name = name.clone();
            move |_, state| state.indices.contains_key(&name)
        })
        .into_iter()
        .any(|e| e);
    if exists || ds.definitions().contains_key(&name) {
        return Err(SearchError::IndexExists);
    }

    ds.shards().global({
        let name = name.clone();
        let definition = Arc::clone(&definition);
        move |_, state| {
            let mut index = ShardDocIndex::new(Arc::clone(&definition));
            index.rebuild_from(&state.store);
            state.indices.insert(name.clone(), index);
        }
    });
    ds.definitions().insert(name, definition);
    Ok(Reply::ok())
}

pub fn ft_alter(ds: &Datastore, _ctx: &CommandContext, args: &[Vec<u8>]) -> Result<Reply> {
    let mut parser = ArgParser::new(args);
    let name = parser.next_string()?;
    parser.expect_tag("SCHEMA")?;
    parser.expect_tag("ADD")?;

    // Existing definition; all shards hold the same handle
    let Some(current) = ds.definitions().get(&name).map(|d| Arc::clone(&d)) else {
        return Err(SearchError::InvalidArgument("Index not found".to_string()));
    };

    let mut added = Schema::default();
    parse_schema(&mut parser, current.kind(), &mut added)?;

    let mut merged = (*current).clone();
    merged.schema.merge(added)?;
    let definition = Arc::new(merged);

    // Full rebuild under the global transaction
    ds.shards().global({
        let name = name.clone();
        let definition = Arc::clone(&definition);
        move |_, state| {
            state.indices.remove(&name);
            let mut index = ShardDocIndex::new(Arc::clone(&definition));
            index.rebuild_from(&state.store);
            state.indices.insert(name.clone(), index);
        }
    });
    ds.definitions().insert(name, definition);
    Ok(Reply::ok())
}

pub fn ft_dropindex(ds: &Datastore, _ctx: &CommandContext, args: &[Vec<u8>]) -> Result<Reply> {
    let mut parser = ArgParser::new(args);
    let name = parser.next_string()?;
    if parser.check("DD") {
        // TODO: delete the matching documents once DD semantics land
    }

    let deleted = ds
        .shards()
        .global({
            let name = name.clone();
            move |_, state| state.indices.remove(&name).is_some()
        })
        .into_iter()
        .filter(|d| *d)
        .count();
    ds.definitions().remove(&name);

    if deleted == 0 {
        return Err(SearchError::UnknownIndex);
    }
    Ok(Reply::ok())
}

pub fn ft_info(ds: &Datastore, _ctx: &CommandContext, args: &[Vec<u8>]) -> Result<Reply> {
    let mut parser = ArgParser::new(args);
    let name = parser.next_string()?;

    let infos: Vec<Option<DocIndexInfo>> = ds.shards().single_hop({
        let name = name.clone();
        move |_, state| state.indices.get(&name).map(|idx| idx.info())
    });

    if infos.iter().any(Option::is_none) {
        return Err(SearchError::UnknownIndex);
    }
    let infos: Vec<DocIndexInfo> = infos.into_iter().flatten().collect();
    let total_num_docs: usize = infos.iter().map(|i| i.num_docs).sum();
    let base = &infos[0].base;

    let mut attributes = Vec::new();
    for (identifier, spec) in base.schema.iter() {
        let mut entry = vec![
            Reply::simple("identifier"),
            Reply::simple(identifier),
            Reply::simple("attribute"),
            Reply::simple(spec.alias.clone()),
            Reply::simple("type"),
            Reply::simple(spec.field_type.name()),
        ];
        if spec.is_noindex() {
            entry.push(Reply::simple("NOINDEX"));
        }
        if spec.is_sortable() {
            entry.push(Reply::simple("SORTABLE"));
        }
        if let FieldParams::Numeric(params) = &spec.params {
            entry.push(Reply::simple("blocksize"));
            entry.push(Reply::simple(params.block_size.to_string()));
        }
        attributes.push(Reply::Array(entry));
    }

    Ok(Reply::Map(vec![
        (Reply::simple("index_name"), Reply::simple(name)),
        (
            Reply::simple("index_definition"),
            Reply::Map(vec![
                (
                    Reply::simple("key_type"),
                    Reply::simple(base.kind().name()),
                ),
                (Reply::simple("prefix"), Reply::simple(base.prefix.clone())),
            ]),
        ),
        (Reply::simple("attributes"), Reply::Array(attributes)),
        (
            Reply::simple("num_docs"),
            Reply::Long(total_num_docs as i64),
        ),
    ]))
}

pub fn ft_list(ds: &Datastore, _ctx: &CommandContext, _args: &[Vec<u8>]) -> Result<Reply> {
    // All shards hold the same names; read them off the first shard
    let names = ds
        .shards()
        .single_hop(|sid, state| {
            if sid == 0 {
                let mut names: Vec<String> = state.indices.keys().cloned().collect();
                names.sort();
                names
            } else {
                Vec::new()
            }
        })
        .into_iter()
        .next()
        .unwrap_or_default();
    Ok(Reply::Array(names.into_iter().map(Reply::bulk).collect()))
}

/// Run the query on every shard, surfacing missing indices and the
/// first shard error.
fn run_search_hop(
    ds: &Datastore,
    name: &str,
    params: &Arc<SearchParams>,
    algo: &Arc<SearchAlgorithm>,
) -> Result<Vec<ShardSearchResult>> {
    let results: Vec<Option<ShardSearchResult>> = ds.shards().single_hop({
        let name = name.to_string();
        let params = Arc::clone(params);
        let algo = Arc::clone(algo);
        move |_, state| {
            state
                .indices
                .get(&name)
                .map(|index| index.search(&state.store, &params, &algo))
        }
    });

    if results.iter().any(Option::is_none) {
        return Err(SearchError::NoSuchIndex(name.to_string()));
    }
    let results: Vec<ShardSearchResult> = results.into_iter().flatten().collect();
    for result in &results {
        if let Some(error) = &result.error {
            return Err(SearchError::InvalidArgument(error.clone()));
        }
    }
    Ok(results)
}

pub fn ft_search(ds: &Datastore, _ctx: &CommandContext, args: &[Vec<u8>]) -> Result<Reply> {
    let mut parser = ArgParser::new(args);
    let name = parser.next_string()?;
    let query = parser.next_string()?;
    let params = Arc::new(parse_search_params(&mut parser)?);

    let Some(definition) = ds.definitions().get(&name).map(|d| Arc::clone(&d)) else {
        return Err(SearchError::NoSuchIndex(name));
    };
    let algo = Arc::new(SearchAlgorithm::init(
        &query,
        &params.query_params,
        &definition.schema,
    )?);

    let results = run_search_hop(ds, &name, &params, &algo)?;
    Ok(search_reply(&params, algo.knn_sort_option(), results))
}

pub fn ft_profile(ds: &Datastore, _ctx: &CommandContext, args: &[Vec<u8>]) -> Result<Reply> {
    let mut parser = ArgParser::new(args);
    let name = parser.next_string()?;

    if !parser.check("SEARCH") && !parser.check("AGGREGATE") {
        return Err(SearchError::InvalidArgument(
            "no `SEARCH` or `AGGREGATE` provided".to_string(),
        ));
    }
    parser.check("LIMITED"); // TODO: limited profiling
    parser.expect_tag("QUERY")?;

    let query = parser.next_string()?;
    let params = Arc::new(parse_search_params(&mut parser)?);

    let Some(definition) = ds.definitions().get(&name).map(|d| Arc::clone(&d)) else {
        return Err(SearchError::NoSuchIndex(name));
    };
    let mut algo = SearchAlgorithm::init(&query, &params.query_params, &definition.schema)?;
    algo.enable_profiling();
    let algo = Arc::new(algo);

    let started = Instant::now();
    let timed: Vec<Option<(ShardSearchResult, u64)>> = ds.shards().single_hop({
        let name = name.clone();
        let params = Arc::clone(&params);
        let algo = Arc::clone(&algo);
        move |_, state| {
            state.indices.get(&name).map(|index| {
                let shard_start = Instant::now();
                let result = index.search(&state.store, &params, &algo);
                (result, shard_start.elapsed().as_micros() as u64)
            })
        }
    });
    let took = started.elapsed().as_micros() as u64;

    if timed.iter().any(Option::is_none) {
        return Err(SearchError::NoSuchIndex(name));
    }
    let timed: Vec<(ShardSearchResult, u64)> = timed.into_iter().flatten().collect();

    let any_error = timed.iter().any(|(r, _)| r.error.is_some());
    let total_docs: usize = timed.iter().map(|(r, _)| r.total_hits).sum();
    let total_serialized: usize = timed.iter().map(|(r, _)| r.docs.len()).sum();

    let mut shard_profiles = Vec::new();
    let mut results = Vec::with_capacity(timed.len());
    for (result, micros) in timed {
        let tree = result
            .profile
            .as_ref()
            .map(|p| profile_tree(&p.events))
            .unwrap_or_default();
        shard_profiles.push(Reply::Map(vec![
            (Reply::bulk("took"), Reply::Long(micros as i64)),
            (Reply::bulk("tree"), Reply::Array(tree)),
        ]));
        results.push(result);
    }

    let search_section = if any_error {
        Reply::Array(vec![Reply::Long(0)])
    } else {
        search_reply(&params, algo.knn_sort_option(), results)
    };

    let mut profile_section = vec![Reply::Map(vec![
        (Reply::bulk("took"), Reply::Long(took as i64)),
        (Reply::bulk("hits"), Reply::Long(total_docs as i64)),
        (
            Reply::bulk("serialized"),
            Reply::Long(total_serialized as i64),
        ),
    ])];
    profile_section.extend(shard_profiles);

    Ok(Reply::Array(vec![
        search_section,
        Reply::Array(profile_section),
    ]))
}

/// Rebuild the event tree from the flat depth-encoded list; self-time
/// is total minus the children's totals.
fn profile_tree(events: &[crate::search::ProfileEvent]) -> Vec<Reply> {
    fn build(events: &[crate::search::ProfileEvent], start: usize, depth: usize) -> (Reply, usize) {
        let event = &events[start];
        let mut children = Vec::new();
        let mut children_micros = 0;
        let mut i = start + 1;
        while i < events.len() && events[i].depth > depth {
            if events[i].depth == depth + 1 {
                children_micros += events[i].micros;
                let (child, next) = build(events, i, depth + 1);
                children.push(child);
                i = next;
            } else {
                i += 1;
            }
        }
        let mut map = vec![
            (
                Reply::simple("total_time"),
                Reply::Long(event.micros as i64),
            ),
            (
                Reply::simple("operation"),
                Reply::simple(event.descr.clone()),
            ),
            (
                Reply::simple("self_time"),
                Reply::Long(event.micros.saturating_sub(children_micros) as i64),
            ),
            (
                Reply::simple("processed"),
                Reply::Long(event.num_processed as i64),
            ),
        ];
        if !children.is_empty() {
            map.push((Reply::simple("children"), Reply::Array(children)));
        }
        (Reply::Map(map), i)
    }

    let mut out = Vec::new();
    let mut i = 0;
    while i < events.len() {
        if events[i].depth == 0 {
            let (node, next) = build(events, i, 0);
            out.push(node);
            i = next;
        } else {
            i += 1;
        }
    }
    out
}

pub fn ft_tagvals(ds: &Datastore, _ctx: &CommandContext, args: &[Vec<u8>]) -> Result<Reply> {
    let mut parser = ArgParser::new(args);
    let name = parser.next_string()?;
    let field = parser.next_string()?;

    let shard_results: Vec<Result<Vec<String>>> = ds.shards().single_hop({
        let name = name.clone();
        let field = field.clone();
        move |_, state| match state.indices.get(&name) {
            Some(index) => index.get_tag_vals(&field),
            None => Err(SearchError::UnknownIndex),
        }
    });

    let mut merged: HashSet<String> = HashSet::new();
    for result in shard_results {
        merged.extend(result?);
    }
    let mut values: Vec<String> = merged.into_iter().collect();
    values.sort();
    Ok(Reply::Set(values.into_iter().map(Reply::bulk).collect()))
}

pub fn ft_aggregate(ds: &Datastore, _ctx: &CommandContext, args: &[Vec<u8>]) -> Result<Reply> {
    let mut parser = ArgParser::new(args);
    let params = parse_aggregator_params(&mut parser, ds.config().reject_legacy_field)?;

    let Some(definition) = ds.definitions().get(&params.index).map(|d| Arc::clone(&d)) else {
        return Err(SearchError::NoSuchIndex(params.index));
    };
    let algo = Arc::new(SearchAlgorithm::init(
        &params.query,
        &params.params,
        &definition.schema,
    )?);

    let load_fields = Arc::new(params.load_fields);
    let rows: Vec<Vec<aggregate::DocValues>> = ds.shards().single_hop({
        let name = params.index.clone();
        let algo = Arc::clone(&algo);
        let load_fields = Arc::clone(&load_fields);
        move |_, state| match state.indices.get(&name) {
            Some(index) => index.search_for_aggregator(&state.store, &load_fields, &algo),
            None => Vec::new(),
        }
    });
    let values: Vec<aggregate::DocValues> = rows.into_iter().flatten().collect();

    let load_names: Vec<String> = load_fields
        .iter()
        .map(|f| f.output_name().to_string())
        .collect();
    let result = aggregate::process(values, &load_names, &params.steps);

    let mut items = Vec::with_capacity(result.values.len() + 1);
    items.push(Reply::Long(result.values.len() as i64));
    for row in &result.values {
        let mut fields = Vec::new();
        for field in &result.fields_to_print {
            if let Some(value) = row.get(field) {
                fields.push(Reply::bulk(field.as_str()));
                fields.push(sortable_value_reply(value));
            }
        }
        items.push(Reply::Array(fields));
    }
    Ok(Reply::Array(items))
}

pub fn ft_syndump(ds: &Datastore, _ctx: &CommandContext, args: &[Vec<u8>]) -> Result<Reply> {
    let mut parser = ArgParser::new(args);
    let name = parser.next_string()?;

    let shard_groups: Vec<Option<HashMap<String, HashSet<String>>>> =
        ds.shards().single_hop({
            let name = name.clone();
            move |_, state| {
                state.indices.get(&name).map(|index| {
                    let mut term_groups: HashMap<String, HashSet<String>> = HashMap::new();
                    for (group_id, terms) in index.synonyms().groups() {
                        for term in terms {
                            term_groups
                                .entry(term.clone())
                                .or_default()
                                .insert(group_id.clone());
                        }
                    }
                    term_groups
                })
            }
        });

    if shard_groups.iter().all(Option::is_none) {
        return Err(SearchError::InvalidArgument("Unknown index name".to_string()));
    }

    let mut merged: HashMap<String, HashSet<String>> = HashMap::new();
    for groups in shard_groups.into_iter().flatten() {
        for (term, ids) in groups {
            merged.entry(term).or_default().extend(ids);
        }
    }

    let mut terms: Vec<String> = merged.keys().cloned().collect();
    terms.sort();

    let mut items = Vec::with_capacity(terms.len() * 2);
    for term in terms {
        let mut ids: Vec<String> = merged
            .remove(&term)
            .unwrap_or_default()
            .into_iter()
            .collect();
        ids.sort();
        items.push(Reply::bulk(term));
        items.push(Reply::Array(ids.into_iter().map(Reply::bulk).collect()));
    }
    Ok(Reply::Array(items))
}

pub fn ft_synupdate(ds: &Datastore, _ctx: &CommandContext, args: &[Vec<u8>]) -> Result<Reply> {
    let mut parser = ArgParser::new(args);
    let name = parser.next_string()?;
    let group_id = parser.next_string()?;

    // Accepted for compatibility; the original ignores it as well
    let _skip_initial_scan = parser.check("SKIPINITIALSCAN");

    let mut terms = Vec::new();
    while parser.has_next() {
        terms.push(parser.next_string()?);
    }
    if terms.is_empty() {
        return Err(SearchError::InvalidArgument("No terms specified".to_string()));
    }

    let terms = Arc::new(terms);
    let group_id = Arc::new(group_id);
    let found = ds
        .shards()
        .global({
            let name = name.clone();
            let terms = Arc::clone(&terms);
            let group_id = Arc::clone(&group_id);
            move |_, state| {
                let Some(index) = state.indices.get_mut(&name) else {
                    return false;
                };
                index.rebuild_for_group(&state.store, &group_id, &terms);
                true
            }
        })
        .into_iter()
        .any(|f| f);

    if !found {
        return Err(SearchError::NoSuchIndex(name));
    }
    Ok(Reply::ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use crate::datastore::Datastore;

    fn pairs(fields: &[(&str, &str)]) -> Vec<(String, Vec<u8>)> {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect()
    }

    fn fruit_store() -> Datastore {
        let ds = Datastore::new();
        let reply = ds.cmd(&[
            "FT.CREATE", "idx", "ON", "HASH", "PREFIX", "1", "doc:", "SCHEMA", "name", "TAG",
            "SORTABLE", "price", "NUMERIC", "SORTABLE", "body", "TEXT",
        ]);
        assert_eq!(reply, Reply::ok());
        ds.hset("doc:1", pairs(&[("name", "apple"), ("price", "3.5"), ("body", "sweet red")]));
        ds.hset("doc:2", pairs(&[("name", "banana"), ("price", "1"), ("body", "ripe yellow")]));
        ds.hset("doc:3", pairs(&[("name", "apple"), ("price", "2"), ("body", "sour green")]));
        ds
    }

    fn total_hits(reply: &Reply) -> i64 {
        reply.as_array().unwrap()[0].as_long().unwrap()
    }

    fn doc_keys(reply: &Reply) -> Vec<String> {
        let items = reply.as_array().unwrap();
        items[1..]
            .iter()
            .step_by(2)
            .map(|r| r.as_str().unwrap().to_string())
            .collect()
    }

    fn vector_bytes(components: &[f32]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(components.len() * 4);
        for c in components {
            bytes.extend_from_slice(&c.to_le_bytes());
        }
        bytes
    }

    fn raw_args(parts: &[&[u8]]) -> Vec<Vec<u8>> {
        parts.iter().map(|p| p.to_vec()).collect()
    }

    #[test]
    fn test_info_lists_attributes_in_order() {
        let ds = fruit_store();
        let reply = ds.cmd(&["FT.INFO", "idx"]);

        assert_eq!(reply.map_get("index_name").unwrap().as_str(), Some("idx"));
        let definition = reply.map_get("index_definition").unwrap();
        assert_eq!(definition.map_get("key_type").unwrap().as_str(), Some("HASH"));
        assert_eq!(definition.map_get("prefix").unwrap().as_str(), Some("doc:"));
        assert_eq!(reply.map_get("num_docs"), Some(&Reply::Long(3)));

        let attributes = reply.map_get("attributes").unwrap().as_array().unwrap();
        assert_eq!(attributes.len(), 3);
        let first = attributes[0].as_array().unwrap();
        assert_eq!(first[1].as_str(), Some("name"));
        assert_eq!(first[5].as_str(), Some("TAG"));
        assert!(first.iter().any(|r| r.as_str() == Some("SORTABLE")));
        let second = attributes[1].as_array().unwrap();
        assert_eq!(second[5].as_str(), Some("NUMERIC"));
        assert!(second.iter().any(|r| r.as_str() == Some("blocksize")));
    }

    #[test]
    fn test_list_and_drop() {
        let ds = fruit_store();
        let reply = ds.cmd(&["FT._LIST"]);
        assert_eq!(reply.as_array().unwrap().len(), 1);

        assert_eq!(ds.cmd(&["FT.DROPINDEX", "idx"]), Reply::ok());
        assert_eq!(ds.cmd(&["FT._LIST"]), Reply::Array(Vec::new()));
        assert_eq!(
            ds.cmd(&["FT.DROPINDEX", "idx"]),
            Reply::Error("Unknown Index name".to_string())
        );
    }

    #[test]
    fn test_create_drop_create_is_idempotent() {
        let ds = fruit_store();
        assert_eq!(ds.cmd(&["FT.DROPINDEX", "idx"]), Reply::ok());
        let reply = ds.cmd(&[
            "FT.CREATE", "idx", "ON", "HASH", "PREFIX", "1", "doc:", "SCHEMA", "name", "TAG",
            "SORTABLE", "price", "NUMERIC", "SORTABLE", "body", "TEXT",
        ]);
        assert_eq!(reply, Reply::ok());
        assert_eq!(total_hits(&ds.cmd(&["FT.SEARCH", "idx", "*"])), 3);
        assert_eq!(total_hits(&ds.cmd(&["FT.SEARCH", "idx", "@name:{apple}"])), 2);
    }

    #[test]
    fn test_duplicate_create_rejected() {
        let ds = fruit_store();
        let reply = ds.cmd(&["FT.CREATE", "idx", "SCHEMA", "name", "TAG"]);
        assert_eq!(reply, Reply::Error("Index already exists".to_string()));
    }

    #[test]
    fn test_alter_adds_field_and_rebuilds() {
        let ds = fruit_store();
        ds.hset("doc:4", pairs(&[("name", "kiwi"), ("origin", "nz")]));

        let reply = ds.cmd(&["FT.ALTER", "idx", "SCHEMA", "ADD", "origin", "TAG"]);
        assert_eq!(reply, Reply::ok());
        assert_eq!(total_hits(&ds.cmd(&["FT.SEARCH", "idx", "@origin:{nz}"])), 1);
        // Old fields survive the rebuild
        assert_eq!(total_hits(&ds.cmd(&["FT.SEARCH", "idx", "@name:{apple}"])), 2);

        let reply = ds.cmd(&["FT.ALTER", "nope", "SCHEMA", "ADD", "x", "TAG"]);
        assert_eq!(reply, Reply::Error("Index not found".to_string()));
    }

    #[test]
    fn test_knn_flat_scenario() {
        let ds = Datastore::new();
        ds.cmd(&[
            "FT.CREATE", "vidx", "ON", "HASH", "PREFIX", "1", "v:", "SCHEMA", "v", "VECTOR",
            "FLAT", "6", "DIM", "2", "DISTANCE_METRIC", "L2", "INITIAL_CAP", "8",
        ]);
        for (key, vector) in [
            ("v:origin", [0.0f32, 0.0]),
            ("v:right", [1.0, 0.0]),
            ("v:up", [0.0, 1.0]),
        ] {
            ds.hset(key, vec![("v".to_string(), vector_bytes(&vector))]);
        }

        let args = raw_args(&[
            b"vidx",
            b"*=>[KNN 2 @v $q AS s]",
            b"PARAMS",
            b"2",
            b"q",
            &vector_bytes(&[0.1, 0.0]),
            b"RETURN",
            b"1",
            b"s",
        ]);
        let reply = ds.execute("FT.SEARCH", &args);

        let items = reply.as_array().unwrap();
        assert_eq!(items[0], Reply::Long(2));
        assert_eq!(items[1].as_str(), Some("v:origin"));
        assert_eq!(items[3].as_str(), Some("v:right"));
        let Some(Reply::Double(first)) = items[2].map_get("s") else {
            panic!("missing knn score: {:?}", items[2]);
        };
        let Some(Reply::Double(second)) = items[4].map_get("s") else {
            panic!("missing knn score: {:?}", items[4]);
        };
        assert!(first < second);
        assert!((first - 0.1).abs() < 1e-5);
    }

    #[test]
    fn test_knn_with_filter() {
        let ds = Datastore::new();
        ds.cmd(&[
            "FT.CREATE", "vidx", "ON", "HASH", "PREFIX", "1", "v:", "SCHEMA", "kind", "TAG", "v",
            "VECTOR", "FLAT", "2", "DIM", "2",
        ]);
        for (key, kind, vector) in [
            ("v:1", "a", [0.0f32, 0.0]),
            ("v:2", "b", [0.1, 0.0]),
            ("v:3", "a", [1.0, 0.0]),
        ] {
            let mut fields = pairs(&[("kind", kind)]);
            fields.push(("v".to_string(), vector_bytes(&vector)));
            ds.hset(key, fields);
        }

        let args = raw_args(&[
            b"vidx",
            b"@kind:{a}=>[KNN 2 @v $q]",
            b"PARAMS",
            b"2",
            b"q",
            &vector_bytes(&[0.0, 0.0]),
            b"NOCONTENT",
        ]);
        let reply = ds.execute("FT.SEARCH", &args);
        let items = reply.as_array().unwrap();
        // v:2 is closest but filtered out by the tag predicate
        assert_eq!(items[0], Reply::Long(2));
        assert_eq!(items[1].as_str(), Some("v:1"));
        assert_eq!(items[2].as_str(), Some("v:3"));
    }

    #[test]
    fn test_aggregate_groupby_scenario() {
        let ds = fruit_store();
        let reply = ds.cmd(&[
            "FT.AGGREGATE", "idx", "*", "GROUPBY", "1", "@name", "REDUCE", "COUNT", "0", "AS",
            "n", "SORTBY", "2", "@n", "DESC",
        ]);
        let items = reply.as_array().unwrap();
        assert_eq!(items[0], Reply::Long(2));

        let first = items[1].as_array().unwrap();
        assert_eq!(first[0].as_str(), Some("name"));
        assert_eq!(first[1].as_str(), Some("apple"));
        assert_eq!(first[2].as_str(), Some("n"));
        assert_eq!(first[3], Reply::Double(2.0));

        let second = items[2].as_array().unwrap();
        assert_eq!(second[1].as_str(), Some("banana"));
        assert_eq!(second[3], Reply::Double(1.0));
    }

    #[test]
    fn test_aggregate_sum_avg() {
        let ds = fruit_store();
        let reply = ds.cmd(&[
            "FT.AGGREGATE", "idx", "*", "GROUPBY", "1", "@name", "REDUCE", "SUM", "1", "@price",
            "AS", "total", "REDUCE", "AVG", "1", "@price", "AS", "mean",
        ]);
        let items = reply.as_array().unwrap();
        let apple = items[1..]
            .iter()
            .map(|r| r.as_array().unwrap())
            .find(|row| row[1].as_str() == Some("apple"))
            .unwrap();
        assert_eq!(apple[3], Reply::Double(5.5));
        assert_eq!(apple[5], Reply::Double(2.75));
    }

    #[test]
    fn test_aggregate_rejects_legacy_field_names() {
        let ds = fruit_store();
        let reply = ds.cmd(&[
            "FT.AGGREGATE", "idx", "*", "GROUPBY", "1", "name", "REDUCE", "COUNT", "0", "AS", "n",
        ]);
        assert!(matches!(reply, Reply::Error(msg) if msg.contains("start with '@'")));

        let legacy = Datastore::with_config(SearchConfig {
            reject_legacy_field: false,
            ..Default::default()
        });
        legacy.cmd(&["FT.CREATE", "idx", "PREFIX", "1", "doc:", "SCHEMA", "name", "TAG"]);
        legacy.hset("doc:1", pairs(&[("name", "apple")]));
        let reply = legacy.cmd(&[
            "FT.AGGREGATE", "idx", "*", "GROUPBY", "1", "name", "REDUCE", "COUNT", "0", "AS", "n",
        ]);
        assert_eq!(total_hits(&reply), 1);
    }

    #[test]
    fn test_aggregate_load_after_groupby_is_error() {
        let ds = fruit_store();
        let reply = ds.cmd(&[
            "FT.AGGREGATE", "idx", "*", "GROUPBY", "1", "@name", "REDUCE", "COUNT", "0", "AS",
            "n", "LOAD", "1", "price",
        ]);
        assert!(matches!(reply, Reply::Error(msg) if msg.contains("LOAD cannot be applied")));
    }

    #[test]
    fn test_synupdate_and_search() {
        let ds = fruit_store();
        ds.hset("doc:9", pairs(&[("name", "sedan"), ("body", "a fine automobile")]));

        assert_eq!(total_hits(&ds.cmd(&["FT.SEARCH", "idx", "car"])), 0);
        assert_eq!(
            ds.cmd(&["FT.SYNUPDATE", "idx", "g1", "car", "automobile"]),
            Reply::ok()
        );
        assert_eq!(total_hits(&ds.cmd(&["FT.SEARCH", "idx", "car"])), 1);
        assert_eq!(total_hits(&ds.cmd(&["FT.SEARCH", "idx", "automobile"])), 1);

        let reply = ds.cmd(&["FT.SYNUPDATE", "nope", "g1", "x"]);
        assert_eq!(reply, Reply::Error("nope: no such index".to_string()));
    }

    #[test]
    fn test_syndump_shape() {
        let ds = fruit_store();
        ds.cmd(&["FT.SYNUPDATE", "idx", "g2", "car", "auto"]);
        ds.cmd(&["FT.SYNUPDATE", "idx", "g1", "car", "automobile"]);

        let reply = ds.cmd(&["FT.SYNDUMP", "idx"]);
        let items = reply.as_array().unwrap();
        // [auto [g2] automobile [g1] car [g1 g2]]
        assert_eq!(items.len(), 6);
        assert_eq!(items[0].as_str(), Some("auto"));
        assert_eq!(items[4].as_str(), Some("car"));
        let car_groups = items[5].as_array().unwrap();
        assert_eq!(car_groups.len(), 2);
        assert_eq!(car_groups[0].as_str(), Some("g1"));
        assert_eq!(car_groups[1].as_str(), Some("g2"));
    }

    #[test]
    fn test_tagvals_unions_shards() {
        let ds = fruit_store();
        let reply = ds.cmd(&["FT.TAGVALS", "idx", "name"]);
        let Reply::Set(values) = reply else {
            panic!("expected set reply");
        };
        let tags: Vec<_> = values.iter().filter_map(|r| r.as_str()).collect();
        assert_eq!(tags, vec!["apple", "banana"]);

        let reply = ds.cmd(&["FT.TAGVALS", "idx", "price"]);
        assert!(matches!(reply, Reply::Error(msg) if msg.contains("Not a tag field")));
    }

    #[test]
    fn test_profile_reply_shape() {
        let ds = fruit_store();
        let reply = ds.cmd(&[
            "FT.PROFILE", "idx", "SEARCH", "QUERY", "@name:{apple} @price:[0 10]",
        ]);
        let sections = reply.as_array().unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(total_hits(&sections[0]), 2);

        let profile = sections[1].as_array().unwrap();
        assert_eq!(profile.len(), 1 + ds.shards().size());
        assert_eq!(profile[0].map_get("hits"), Some(&Reply::Long(2)));
        assert!(profile[0].map_get("took").is_some());
        assert!(profile[0].map_get("serialized").is_some());

        // Every shard entry carries a tree of operator events
        let shard_entry = profile[1].as_map().unwrap();
        assert!(shard_entry.iter().any(|(k, _)| k.as_str() == Some("tree")));
        let tree = profile[1].map_get("tree").unwrap().as_array().unwrap();
        let root = &tree[0];
        assert!(root.map_get("total_time").is_some());
        assert!(root.map_get("self_time").is_some());
        assert_eq!(
            root.map_get("operation").unwrap().as_str(),
            Some("And(2)")
        );
        assert!(root.map_get("children").is_some());
    }

    #[test]
    fn test_profile_requires_mode() {
        let ds = fruit_store();
        let reply = ds.cmd(&["FT.PROFILE", "idx", "QUERY", "*"]);
        assert!(matches!(reply, Reply::Error(msg) if msg.contains("SEARCH")));
    }

    #[test]
    fn test_stopwords_are_not_indexed() {
        let ds = Datastore::new();
        ds.cmd(&[
            "FT.CREATE", "sidx", "ON", "HASH", "PREFIX", "1", "s:", "STOPWORDS", "2", "the", "a",
            "SCHEMA", "body", "TEXT",
        ]);
        ds.hset("s:1", pairs(&[("body", "the quick fox")]));

        assert_eq!(total_hits(&ds.cmd(&["FT.SEARCH", "sidx", "quick"])), 1);
        assert_eq!(total_hits(&ds.cmd(&["FT.SEARCH", "sidx", "the"])), 0);
    }

    #[test]
    fn test_phrase_search() {
        let ds = fruit_store();
        assert_eq!(total_hits(&ds.cmd(&["FT.SEARCH", "idx", "\"sweet red\""])), 1);
        assert_eq!(total_hits(&ds.cmd(&["FT.SEARCH", "idx", "\"red sweet\""])), 0);
    }

    #[test]
    fn test_negation_and_or() {
        let ds = fruit_store();
        assert_eq!(total_hits(&ds.cmd(&["FT.SEARCH", "idx", "-@name:{apple}"])), 1);
        assert_eq!(
            total_hits(&ds.cmd(&["FT.SEARCH", "idx", "@name:{banana} | @name:{apple}"])),
            3
        );
    }

    #[test]
    fn test_params_in_numeric_range() {
        let ds = fruit_store();
        let reply = ds.cmd(&[
            "FT.SEARCH", "idx", "@price:[$lo $hi]", "PARAMS", "4", "lo", "1", "hi", "2",
        ]);
        assert_eq!(total_hits(&reply), 2);
    }

    #[test]
    fn test_load_projects_raw_fields() {
        let ds = fruit_store();
        ds.hset("doc:1", pairs(&[("extra", "stored-only")]));
        let reply = ds.cmd(&["FT.SEARCH", "idx", "@price:[3 4]", "LOAD", "1", "extra"]);
        let items = reply.as_array().unwrap();
        assert_eq!(items[1].as_str(), Some("doc:1"));
        let fields = &items[2];
        assert_eq!(fields.map_get("extra"), Some(&Reply::bulk("stored-only")));
        assert!(fields.map_get("name").is_none());
    }

    #[test]
    fn test_load_after_return_conflict() {
        let ds = fruit_store();
        let reply = ds.cmd(&[
            "FT.SEARCH", "idx", "*", "RETURN", "1", "name", "LOAD", "1", "price",
        ]);
        assert!(matches!(reply, Reply::Error(msg) if msg.contains("LOAD cannot be applied")));
    }

    #[test]
    fn test_noindex_field_projected_but_unmatchable() {
        let ds = Datastore::new();
        ds.cmd(&[
            "FT.CREATE", "nidx", "ON", "HASH", "PREFIX", "1", "n:", "SCHEMA", "name", "TAG",
            "secret", "TAG", "NOINDEX",
        ]);
        ds.hset("n:1", pairs(&[("name", "x"), ("secret", "hidden")]));

        assert_eq!(total_hits(&ds.cmd(&["FT.SEARCH", "nidx", "@secret:{hidden}"])), 0);
        let reply = ds.cmd(&["FT.SEARCH", "nidx", "@name:{x}"]);
        let fields = &reply.as_array().unwrap()[2];
        assert_eq!(fields.map_get("secret"), Some(&Reply::bulk("hidden")));
    }

    #[test]
    fn test_ignored_field_options_are_tolerated() {
        let ds = Datastore::new();
        let reply = ds.cmd(&[
            "FT.CREATE", "tidx", "PREFIX", "1", "t:", "SCHEMA", "body", "TEXT", "NOSTEM",
            "WEIGHT", "2.0", "SORTABLE",
        ]);
        assert_eq!(reply, Reply::ok());
        // A mistyped supported flag is not silently swallowed
        let reply = ds.cmd(&["FT.CREATE", "tidx2", "SCHEMA", "body", "TXET"]);
        assert!(matches!(reply, Reply::Error(msg) if msg.contains("not supported")));
    }

    #[test]
    fn test_schema_validation_errors() {
        let ds = Datastore::new();
        let reply = ds.cmd(&["FT.CREATE", "e1", "SCHEMA", "a", "TAG", "a", "TEXT"]);
        assert!(matches!(reply, Reply::Error(msg) if msg.contains("Duplicate field")));

        let reply = ds.cmd(&[
            "FT.CREATE", "e2", "ON", "JSON", "SCHEMA", "not-a-path", "TAG",
        ]);
        assert!(matches!(reply, Reply::Error(msg) if msg.contains("Bad json path")));

        let reply = ds.cmd(&[
            "FT.CREATE", "e3", "SCHEMA", "v", "VECTOR", "FLAT", "2", "DIM", "0",
        ]);
        assert!(matches!(reply, Reply::Error(msg) if msg.contains("dimension cannot be zero")));

        let reply = ds.cmd(&[
            "FT.CREATE", "e4", "SCHEMA", "t", "TAG", "SEPARATOR", "ab",
        ]);
        assert!(matches!(reply, Reply::Error(msg) if msg.contains("single character")));

        let reply = ds.cmd(&["FT.CREATE", "e5", "PREFIX", "2", "a:", "b:", "SCHEMA", "x", "TAG"]);
        assert!(matches!(reply, Reply::Error(msg) if msg.contains("Multiple prefixes")));
    }

    #[test]
    fn test_wrong_arity() {
        let ds = Datastore::new();
        let reply = ds.cmd(&["FT.SEARCH", "idx"]);
        assert!(matches!(reply, Reply::Error(msg) if msg.contains("wrong number of arguments")));
    }

    #[test]
    fn test_tag_separator_and_casesensitive_options() {
        let ds = Datastore::new();
        ds.cmd(&[
            "FT.CREATE", "cidx", "PREFIX", "1", "c:", "SCHEMA", "tags", "TAG", "SEPARATOR", ";",
            "CASESENSITIVE",
        ]);
        ds.hset("c:1", pairs(&[("tags", "Red;Blue")]));

        assert_eq!(total_hits(&ds.cmd(&["FT.SEARCH", "cidx", "@tags:{Red}"])), 1);
        assert_eq!(total_hits(&ds.cmd(&["FT.SEARCH", "cidx", "@tags:{red}"])), 0);
        assert_eq!(total_hits(&ds.cmd(&["FT.SEARCH", "cidx", "@tags:{Blue}"])), 1);
    }

    #[test]
    fn test_suffix_wildcard_via_command() {
        let ds = Datastore::new();
        ds.cmd(&[
            "FT.CREATE", "widx", "PREFIX", "1", "w:", "SCHEMA", "tags", "TAG", "WITHSUFFIXTRIE",
            "body", "TEXT", "WITHSUFFIXTRIE",
        ]);
        ds.hset("w:1", pairs(&[("tags", "running,shoes"), ("body", "jogging gear")]));

        assert_eq!(total_hits(&ds.cmd(&["FT.SEARCH", "widx", "@tags:{*ning}"])), 1);
        assert_eq!(total_hits(&ds.cmd(&["FT.SEARCH", "widx", "*ging"])), 1);
        assert_eq!(total_hits(&ds.cmd(&["FT.SEARCH", "widx", "*zzz"])), 0);
    }
}
