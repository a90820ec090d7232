use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use elasticsearch::{
    http::transport::{BuildError, SingleNodeConnectionPool, TransportBuilder},
    indices::{IndicesCreateParts, IndicesExistsParts},
    DeleteParts, Elasticsearch, IndexParts, SearchParts,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;
use url::Url;
use uuid::Uuid;

use crate::config::IndexNames;
use crate::domain::{CastMember, Category, Genre, Video};
use crate::events::projection::VideoStore;
use crate::listing::{
    CastMemberSortField, CategorySortField, GenreSortField, SortDirection, VideoSortField,
};

/// Upper bound on association rows fetched by the genre/category join.
const GENRE_CATEGORY_JOIN_SIZE: u32 = 1000;

const CATEGORY_SEARCH_FIELDS: &[&str] = &["name", "description"];
const CAST_MEMBER_SEARCH_FIELDS: &[&str] = &["name", "type"];
const GENRE_SEARCH_FIELDS: &[&str] = &["name"];
const VIDEO_SEARCH_FIELDS: &[&str] = &["title"];

#[derive(Debug, Error)]
pub enum SearchStoreError {
    #[error("invalid Elasticsearch URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("failed to build transport: {0}")]
    TransportBuild(#[from] BuildError),
    #[error("transport error: {0}")]
    Transport(#[from] elasticsearch::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("search request rejected with status {status}")]
    SearchRejected { status: u16 },
    #[error("index write rejected with status {status}")]
    WriteRejected { status: u16 },
}

/// Catalog repository over the Elasticsearch indices.
///
/// One client shared by the listing endpoints (reads) and the projection
/// pipeline (video upserts/deletes). Writes are full-document replaces
/// keyed by entity id, so concurrent writers degrade to last-write-wins.
#[derive(Clone)]
pub struct ElasticsearchCatalog {
    client: Elasticsearch,
    categories_index: String,
    cast_members_index: String,
    genres_index: String,
    genre_categories_index: String,
    videos_index: String,
}

impl ElasticsearchCatalog {
    pub async fn new(url: &str, indices: &IndexNames) -> Result<Self, SearchStoreError> {
        let parsed = Url::parse(url)?;
        let pool = SingleNodeConnectionPool::new(parsed);
        let transport = TransportBuilder::new(pool).build()?;
        let client = Elasticsearch::new(transport);

        let instance = Self {
            client,
            categories_index: indices.categories.clone(),
            cast_members_index: indices.cast_members.clone(),
            genres_index: indices.genres.clone(),
            genre_categories_index: indices.genre_categories.clone(),
            videos_index: indices.videos.clone(),
        };

        instance.ensure_indices().await?;

        Ok(instance)
    }

    async fn ensure_indices(&self) -> Result<(), SearchStoreError> {
        self.ensure_index(&self.categories_index, categories_mapping())
            .await?;
        self.ensure_index(&self.cast_members_index, cast_members_mapping())
            .await?;
        self.ensure_index(&self.genres_index, genres_mapping())
            .await?;
        self.ensure_index(&self.genre_categories_index, genre_categories_mapping())
            .await?;
        self.ensure_index(&self.videos_index, videos_mapping())
            .await?;
        Ok(())
    }

    async fn ensure_index(&self, index: &str, body: Value) -> Result<(), SearchStoreError> {
        let exists_response = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[index]))
            .send()
            .await?;

        if exists_response.status_code().is_success() {
            return Ok(());
        }

        self.client
            .indices()
            .create(IndicesCreateParts::Index(index))
            .body(body)
            .send()
            .await?;

        Ok(())
    }

    pub async fn search_categories(
        &self,
        page: u32,
        per_page: u32,
        search: Option<&str>,
        sort: Option<CategorySortField>,
        direction: SortDirection,
    ) -> Result<Vec<Category>, SearchStoreError> {
        let body = build_search_body(
            page,
            per_page,
            search,
            CATEGORY_SEARCH_FIELDS,
            sort.map(CategorySortField::as_str),
            direction,
        );
        self.search_index(&self.categories_index, body).await
    }

    pub async fn search_cast_members(
        &self,
        page: u32,
        per_page: u32,
        search: Option<&str>,
        sort: Option<CastMemberSortField>,
        direction: SortDirection,
    ) -> Result<Vec<CastMember>, SearchStoreError> {
        let body = build_search_body(
            page,
            per_page,
            search,
            CAST_MEMBER_SEARCH_FIELDS,
            sort.map(CastMemberSortField::as_str),
            direction,
        );
        self.search_index(&self.cast_members_index, body).await
    }

    /// Genre listing joins category associations in from a second index.
    /// The two reads are not atomic; a concurrent association change can
    /// produce a momentarily stale set.
    pub async fn search_genres(
        &self,
        page: u32,
        per_page: u32,
        search: Option<&str>,
        sort: Option<GenreSortField>,
        direction: SortDirection,
    ) -> Result<Vec<Genre>, SearchStoreError> {
        let body = build_search_body(
            page,
            per_page,
            search,
            GENRE_SEARCH_FIELDS,
            sort.map(GenreSortField::as_str),
            direction,
        );
        let mut genres: Vec<Genre> = self.search_index(&self.genres_index, body).await?;
        if genres.is_empty() {
            return Ok(genres);
        }

        let genre_ids: Vec<String> = genres.iter().map(|g| g.id.to_string()).collect();
        let categories = self.fetch_categories_for_genres(&genre_ids).await?;
        apply_genre_categories(&mut genres, &categories);

        Ok(genres)
    }

    async fn fetch_categories_for_genres(
        &self,
        genre_ids: &[String],
    ) -> Result<HashMap<Uuid, BTreeSet<Uuid>>, SearchStoreError> {
        let body = json!({
            "size": GENRE_CATEGORY_JOIN_SIZE,
            "query": {
                "terms": {
                    "genre_id.keyword": genre_ids,
                }
            }
        });
        let links: Vec<GenreCategoryLink> =
            self.search_index(&self.genre_categories_index, body).await?;
        Ok(group_genre_links(links))
    }

    pub async fn search_videos(
        &self,
        page: u32,
        per_page: u32,
        search: Option<&str>,
        sort: Option<VideoSortField>,
        direction: SortDirection,
    ) -> Result<Vec<Video>, SearchStoreError> {
        let body = build_search_body(
            page,
            per_page,
            search,
            VIDEO_SEARCH_FIELDS,
            sort.map(VideoSortField::as_str),
            direction,
        );
        self.search_index(&self.videos_index, body).await
    }

    async fn search_index<T: DeserializeOwned>(
        &self,
        index: &str,
        body: Value,
    ) -> Result<Vec<T>, SearchStoreError> {
        let response = self
            .client
            .search(SearchParts::Index(&[index]))
            .body(body)
            .send()
            .await?;

        if !index_present(response.status_code().as_u16())? {
            // Missing index on first boot: an empty page beats failing
            // the whole request.
            warn!(index, "index not created yet; returning empty page");
            return Ok(Vec::new());
        }

        let parsed: SearchResponse = response.json().await?;
        Ok(decode_hits(index, parsed.hits.hits))
    }

    pub async fn health_check(&self) -> Result<(), SearchStoreError> {
        let response = self.client.ping().send().await?;
        if response.status_code().is_success() {
            Ok(())
        } else {
            Err(SearchStoreError::WriteRejected {
                status: response.status_code().as_u16(),
            })
        }
    }
}

#[async_trait]
impl VideoStore for ElasticsearchCatalog {
    /// Full-document replace keyed by the video id (idempotent upsert).
    async fn save_video(&self, video: &Video) -> Result<(), SearchStoreError> {
        let response = self
            .client
            .index(IndexParts::IndexId(
                &self.videos_index,
                video.id.to_string().as_str(),
            ))
            .body(video)
            .send()
            .await?;

        let status = response.status_code();
        if !status.is_success() {
            return Err(SearchStoreError::WriteRejected {
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    async fn delete_video(&self, video_id: Uuid) -> Result<(), SearchStoreError> {
        let response = self
            .client
            .delete(DeleteParts::IndexId(
                &self.videos_index,
                video_id.to_string().as_str(),
            ))
            .send()
            .await?;

        let status = response.status_code();
        // 404 means the document was never projected; deleting it again
        // is a no-op, keeping redelivered delete events idempotent.
        if !status.is_success() && status.as_u16() != 404 {
            return Err(SearchStoreError::WriteRejected {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

fn text_with_keyword() -> Value {
    json!({
        "type": "text",
        "fields": {
            "keyword": { "type": "keyword" }
        }
    })
}

/// Only a missing index (404) reads as an empty page; any other
/// non-success status is a real backend fault and propagates.
fn index_present(status: u16) -> Result<bool, SearchStoreError> {
    match status {
        200..=299 => Ok(true),
        404 => Ok(false),
        status => Err(SearchStoreError::SearchRejected { status }),
    }
}

// Every field that feeds a sort clause or a `terms` join is mapped with a
// `.keyword` subfield; the queries address `<field>.keyword` throughout.

fn categories_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "id": { "type": "keyword" },
                "name": text_with_keyword(),
                "description": text_with_keyword(),
                "created_at": { "type": "date" },
                "updated_at": { "type": "date" },
                "is_active": { "type": "boolean" }
            }
        }
    })
}

fn cast_members_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "id": { "type": "keyword" },
                "name": text_with_keyword(),
                "type": text_with_keyword(),
                "created_at": { "type": "date" },
                "updated_at": { "type": "date" },
                "is_active": { "type": "boolean" }
            }
        }
    })
}

fn genres_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "id": { "type": "keyword" },
                "name": text_with_keyword(),
                "created_at": { "type": "date" },
                "updated_at": { "type": "date" },
                "is_active": { "type": "boolean" }
            }
        }
    })
}

fn genre_categories_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "genre_id": text_with_keyword(),
                "category_id": text_with_keyword()
            }
        }
    })
}

fn videos_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "id": { "type": "keyword" },
                "title": text_with_keyword(),
                "launch_year": { "type": "integer" },
                "rating": { "type": "keyword" },
                "categories": { "type": "keyword" },
                "cast_members": { "type": "keyword" },
                "genres": { "type": "keyword" },
                "banner": { "type": "keyword" },
                "created_at": { "type": "date" },
                "updated_at": { "type": "date" },
                "is_active": { "type": "boolean" }
            }
        }
    })
}

fn build_search_body(
    page: u32,
    per_page: u32,
    search: Option<&str>,
    search_fields: &[&str],
    sort: Option<&str>,
    direction: SortDirection,
) -> Value {
    let must = match search {
        Some(term) => json!([{
            "multi_match": {
                "query": term,
                "fields": search_fields,
            }
        }]),
        None => json!([{ "match_all": {} }]),
    };

    let mut body = json!({
        "from": page.saturating_sub(1).saturating_mul(per_page),
        "size": per_page,
        "query": {
            "bool": { "must": must }
        }
    });

    if let Some(field) = sort {
        let mut clause = serde_json::Map::new();
        clause.insert(
            format!("{field}.keyword"),
            json!({ "order": direction.as_str() }),
        );
        body["sort"] = Value::Array(vec![Value::Object(clause)]);
    }

    body
}

/// Decodes raw hits into documents, skipping malformed ones individually.
/// A page with K undecodable documents still returns the valid remainder
/// in hit order, with one error logged per bad document.
fn decode_hits<T: DeserializeOwned>(index: &str, hits: Vec<SearchHit>) -> Vec<T> {
    let mut documents = Vec::with_capacity(hits.len());
    for hit in hits {
        match serde_json::from_value(hit.source) {
            Ok(document) => documents.push(document),
            Err(err) => {
                warn!(index, doc_id = %hit.id, "skipping malformed document: {err}");
            }
        }
    }
    documents
}

fn group_genre_links(links: Vec<GenreCategoryLink>) -> HashMap<Uuid, BTreeSet<Uuid>> {
    let mut by_genre: HashMap<Uuid, BTreeSet<Uuid>> = HashMap::new();
    for link in links {
        by_genre
            .entry(link.genre_id)
            .or_default()
            .insert(link.category_id);
    }
    by_genre
}

fn apply_genre_categories(genres: &mut [Genre], categories: &HashMap<Uuid, BTreeSet<Uuid>>) {
    for genre in genres {
        if let Some(ids) = categories.get(&genre.id) {
            genre.categories = ids.clone();
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source")]
    source: Value,
}

#[derive(Debug, Deserialize)]
struct GenreCategoryLink {
    genre_id: Uuid,
    category_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Category;
    use chrono::Utc;

    fn hit(id: &str, source: Value) -> SearchHit {
        SearchHit {
            id: id.to_string(),
            source,
        }
    }

    fn category_source(name: &str) -> Value {
        json!({
            "id": Uuid::new_v4(),
            "name": name,
            "description": "",
            "created_at": Utc::now(),
            "updated_at": Utc::now(),
            "is_active": true
        })
    }

    #[test]
    fn decode_hits_skips_malformed_documents_in_order() {
        let hits = vec![
            hit("1", category_source("Action")),
            hit("2", json!({ "name": 42 })),
            hit("3", category_source("Drama")),
        ];

        let categories: Vec<Category> = decode_hits("categories", hits);

        assert_eq!(categories.len(), 2);
        assert_eq!(categories[0].name, "Action");
        assert_eq!(categories[1].name, "Drama");
    }

    #[test]
    fn search_body_defaults_to_match_all_without_term() {
        let body = build_search_body(1, 5, None, &["name"], None, SortDirection::Asc);
        assert_eq!(body["from"], 0);
        assert_eq!(body["size"], 5);
        assert_eq!(body["query"]["bool"]["must"][0], json!({ "match_all": {} }));
        assert!(body.get("sort").is_none());
    }

    #[test]
    fn search_body_uses_multi_match_for_terms() {
        let body = build_search_body(3, 10, Some("drama"), &["title"], None, SortDirection::Asc);
        assert_eq!(body["from"], 20);
        assert_eq!(
            body["query"]["bool"]["must"][0]["multi_match"]["query"],
            "drama"
        );
        assert_eq!(
            body["query"]["bool"]["must"][0]["multi_match"]["fields"][0],
            "title"
        );
    }

    #[test]
    fn search_body_sorts_on_keyword_subfield() {
        let body = build_search_body(1, 5, None, &["name"], Some("name"), SortDirection::Desc);
        assert_eq!(body["sort"][0]["name.keyword"]["order"], "desc");
    }

    #[test]
    fn cast_member_search_covers_name_and_role() {
        let body = build_search_body(
            1,
            5,
            Some("director"),
            CAST_MEMBER_SEARCH_FIELDS,
            None,
            SortDirection::Asc,
        );
        assert_eq!(
            body["query"]["bool"]["must"][0]["multi_match"]["fields"],
            json!(["name", "type"])
        );
    }

    #[test]
    fn sortable_and_joined_fields_carry_keyword_subfields() {
        let cast = cast_members_mapping();
        assert_eq!(
            cast["mappings"]["properties"]["type"]["fields"]["keyword"]["type"],
            "keyword"
        );

        let links = genre_categories_mapping();
        assert_eq!(
            links["mappings"]["properties"]["genre_id"]["fields"]["keyword"]["type"],
            "keyword"
        );
        assert_eq!(
            links["mappings"]["properties"]["category_id"]["fields"]["keyword"]["type"],
            "keyword"
        );
    }

    #[test]
    fn only_a_missing_index_reads_as_an_empty_page() {
        assert!(index_present(200).unwrap());
        assert!(!index_present(404).unwrap());

        let err = index_present(400).unwrap_err();
        assert!(matches!(err, SearchStoreError::SearchRejected { status: 400 }));
        let err = index_present(503).unwrap_err();
        assert!(matches!(err, SearchStoreError::SearchRejected { status: 503 }));
    }

    #[test]
    fn page_beyond_available_results_decodes_to_an_empty_list() {
        let parsed: SearchResponse =
            serde_json::from_value(json!({ "hits": { "hits": [] } })).unwrap();
        let categories: Vec<Category> = decode_hits("categories", parsed.hits.hits);
        assert!(categories.is_empty());
    }

    #[test]
    fn genre_links_group_by_genre_and_merge() {
        let genre_a = Uuid::new_v4();
        let genre_b = Uuid::new_v4();
        let cat_1 = Uuid::new_v4();
        let cat_2 = Uuid::new_v4();

        let grouped = group_genre_links(vec![
            GenreCategoryLink {
                genre_id: genre_a,
                category_id: cat_1,
            },
            GenreCategoryLink {
                genre_id: genre_a,
                category_id: cat_2,
            },
            GenreCategoryLink {
                genre_id: genre_b,
                category_id: cat_1,
            },
        ]);

        let mut genres = vec![
            Genre {
                id: genre_a,
                name: "Drama".to_string(),
                categories: BTreeSet::new(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
                is_active: true,
            },
            Genre {
                id: Uuid::new_v4(),
                name: "Horror".to_string(),
                categories: BTreeSet::new(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
                is_active: true,
            },
        ];
        apply_genre_categories(&mut genres, &grouped);

        assert_eq!(
            genres[0].categories,
            BTreeSet::from([cat_1, cat_2]),
            "associations are fully replaced from the join"
        );
        assert!(
            genres[1].categories.is_empty(),
            "genres without associations keep an empty set"
        );
    }
}
