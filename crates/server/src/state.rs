//! Shared cache components behind the tool handlers.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use permacache_client::{FetchClient, FetchConfig, WikiResolver};
use permacache_core::{
    AppConfig, ArticleDbWriter, CacheController, CacheDb, DiskFileStore, Error, Fetcher, FileStore, FileWriter,
    Gatekeeper, ImageDbWriter, KeyDeriver, PersistentUrlCache, ResourceResolver,
};

/// Which workflow a group belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    /// An article and every resource it needs offline.
    #[default]
    Article,
    /// A single image.
    Image,
}

/// Index, key derivation and one controller per [`CacheKind`].
pub struct CacheState {
    pub db: CacheDb,
    pub keys: KeyDeriver,
    pub articles: CacheController,
    pub images: CacheController,
}

impl CacheState {
    /// Open the on-disk cache described by `config`.
    ///
    /// Downloads go straight to the network. Resource-list lookups go through
    /// [`PersistentUrlCache`] so repeated lookups are served from memory.
    pub async fn open(config: &AppConfig) -> Result<Self, Error> {
        let store: Arc<dyn FileStore> = Arc::new(DiskFileStore::new(config.content_dir()).await?);
        let db = CacheDb::open(config.database_path()).await?;
        let keys = KeyDeriver::from_config(config);

        let client: Arc<dyn Fetcher> = Arc::new(FetchClient::new(FetchConfig::from(config))?);
        let memory_max_cost = usize::try_from(config.memory_cache_max_cost).unwrap_or(usize::MAX);
        let transport = PersistentUrlCache::new(client.clone(), store.clone(), db.clone(), keys.clone(), memory_max_cost);
        let resolver = Arc::new(WikiResolver::new(Arc::new(transport)));

        tracing::info!(
            cache_dir = %config.cache_dir.display(),
            display_scale = config.display_scale,
            "opened permanent cache"
        );

        Ok(Self::new(db, store, keys, client, resolver, config))
    }

    /// Both controllers share one file writer and one gatekeeper, so a
    /// resource both workflows need is downloaded once.
    pub fn new(
        db: CacheDb, store: Arc<dyn FileStore>, keys: KeyDeriver, fetcher: Arc<dyn Fetcher>,
        resolver: Arc<dyn ResourceResolver>, config: &AppConfig,
    ) -> Self {
        let file_writer = Arc::new(FileWriter::new(fetcher, store, keys.clone()));
        let article_writer = Arc::new(ArticleDbWriter::new(db.clone(), keys.clone(), resolver, config.display_scale));
        let image_writer = Arc::new(ImageDbWriter::new(db.clone(), keys.clone(), config.display_scale));

        let gatekeeper = Arc::new(Gatekeeper::new());

        let articles = CacheController::with_gatekeeper(
            article_writer,
            file_writer.clone(),
            keys.clone(),
            config.max_concurrent_downloads,
            gatekeeper.clone(),
        );
        let images = CacheController::with_gatekeeper(
            image_writer,
            file_writer,
            keys.clone(),
            config.max_concurrent_downloads,
            gatekeeper,
        );

        Self { db, keys, articles, images }
    }

    pub fn controller(&self, kind: CacheKind) -> &CacheController {
        match kind {
            CacheKind::Article => &self.articles,
            CacheKind::Image => &self.images,
        }
    }
}
