#![allow(clippy::unwrap_used)]

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use short_hits::{
    memory_repo::InMemoryUrlRepository,
    request_ctx::RequestContext,
    short_code::{CodeGenerator, RandomCodeGenerator, ShortCode},
    url_repo::UrlRepository,
    url_service::{LookupError, ShortenError, UrlMappingService, UrlMappingServiceImpl},
};

/// Cycles through a handful of codes so that concurrent shortens collide.
struct TinyKeyspaceGenerator {
    codes: Vec<ShortCode>,
    next: AtomicUsize,
}

impl TinyKeyspaceGenerator {
    fn new(codes: &[&str]) -> Self {
        Self {
            codes: codes
                .iter()
                .map(|c| ShortCode::new((*c).to_owned()).unwrap())
                .collect(),
            next: AtomicUsize::new(0),
        }
    }
}

impl CodeGenerator for TinyKeyspaceGenerator {
    fn generate(&self) -> ShortCode {
        let i = self.next.fetch_add(1, Ordering::Relaxed);
        self.codes[i % self.codes.len()].clone()
    }
}

fn service_over(
    repo: &Arc<InMemoryUrlRepository>,
    generator: Arc<dyn CodeGenerator>,
) -> Arc<UrlMappingServiceImpl> {
    Arc::new(UrlMappingServiceImpl::new(
        Arc::clone(repo) as Arc<dyn UrlRepository>,
        generator,
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_redirects_lose_no_hits() {
    const REDIRECTS: u64 = 250;

    let repo = Arc::new(InMemoryUrlRepository::new());
    let service = service_over(&repo, Arc::new(RandomCodeGenerator));
    let ctx = RequestContext::background();

    let created = service
        .shorten(&ctx, "https://example.com/page")
        .await
        .unwrap();
    let code = created.short_code.into_inner();

    let handles: Vec<_> = (0..REDIRECTS)
        .map(|_| {
            let service = Arc::clone(&service);
            let code = code.clone();
            tokio::spawn(async move {
                service
                    .resolve_and_record_hit(&RequestContext::background(), &code)
                    .await
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), "https://example.com/page");
    }
    service.wait_for_pending_hits().await;

    let info = service.get_info(&ctx, &code).await.unwrap();
    assert_eq!(info.hit_count, REDIRECTS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_shortens_get_distinct_codes() {
    const SHORTENS: usize = 200;

    let repo = Arc::new(InMemoryUrlRepository::new());
    let service = service_over(&repo, Arc::new(RandomCodeGenerator));

    let handles: Vec<_> = (0..SHORTENS)
        .map(|i| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .shorten(
                        &RequestContext::background(),
                        &format!("https://example.com/{i}"),
                    )
                    .await
            })
        })
        .collect();

    let mut codes = HashSet::new();
    for handle in handles {
        let mapping = handle.await.unwrap().unwrap();
        assert_eq!(mapping.hit_count, 0);
        assert!(codes.insert(mapping.short_code));
    }
    assert_eq!(codes.len(), SHORTENS);
    assert_eq!(repo.len(), SHORTENS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn racing_shortens_never_share_a_code() {
    let repo = Arc::new(InMemoryUrlRepository::new());
    let service = service_over(
        &repo,
        Arc::new(TinyKeyspaceGenerator::new(&["aaaaaa", "bbbbbb", "cccccc"])),
    );

    let handles: Vec<_> = (0..64)
        .map(|i| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .shorten(
                        &RequestContext::background(),
                        &format!("https://example.com/{i}"),
                    )
                    .await
            })
        })
        .collect();

    let mut winners = HashSet::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(mapping) => assert!(winners.insert(mapping.short_code)),
            Err(ShortenError::ExhaustedRetries { .. } | ShortenError::AllocationConflict { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(winners.len(), 3);
    assert_eq!(repo.len(), 3);
    let stored: HashSet<_> = repo.mappings().into_iter().map(|m| m.short_code).collect();
    assert_eq!(stored, winners);
}

#[tokio::test]
async fn unknown_codes_are_always_not_found() {
    let repo = Arc::new(InMemoryUrlRepository::new());
    let service = service_over(&repo, Arc::new(RandomCodeGenerator));
    let ctx = RequestContext::background();
    service.shorten(&ctx, "https://example.com").await.unwrap();

    for code in ["doesNotExist", "zzzzzz", "", "a/b/c", "ZZZZZZ"] {
        if repo.mappings().iter().any(|m| m.short_code.as_str() == code) {
            continue;
        }
        assert!(matches!(
            service.get_info(&ctx, code).await,
            Err(LookupError::NotFound(_))
        ));
        assert!(matches!(
            service.resolve_and_record_hit(&ctx, code).await,
            Err(LookupError::NotFound(_))
        ));
    }
}

#[tokio::test]
async fn info_reflects_shortened_url() {
    let repo = Arc::new(InMemoryUrlRepository::new());
    let service = service_over(&repo, Arc::new(RandomCodeGenerator));
    let ctx = RequestContext::background();

    let created = service
        .shorten(&ctx, "https://example.com/page")
        .await
        .unwrap();
    assert_eq!(created.short_code.as_str().len(), 6);

    let info = service
        .get_info(&ctx, created.short_code.as_str())
        .await
        .unwrap();
    assert_eq!(info.original_url, "https://example.com/page");
    assert_eq!(info.hit_count, 0);

    assert!(matches!(
        service.shorten(&ctx, "ftp://x").await,
        Err(ShortenError::InvalidUrl(_))
    ));
    assert_eq!(repo.len(), 1);
}
