//! # Fulfillment Pipeline
//!
//! Delivers a personalized copy of an item's PDF to an entitled buyer.
//!
//! ## Download Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  1. ENTITLEMENT                                                        │
//! │     ├── download(order)      order owned by caller? status == paid?    │
//! │     └── download_free(item)  item published and priced at zero?       │
//! │                                                                         │
//! │  2. STAGE (blocking pool)                                              │
//! │     blob.get(storage_path) ──► watermark(name <email>) ──► temp file   │
//! │        │ failure                                                        │
//! │        └──► failed log entry, no counters touched, error returned      │
//! │                                                                         │
//! │  3. BOOKKEEPING (one tx)                                               │
//! │     download_count+1, last_download_at, completed log entry            │
//! │        │ failure                                                        │
//! │        ├── ledger rule (e.g. refunded meanwhile) ──► abort             │
//! │        └── anything else ──► error! for operators, file still served   │
//! │                                                                         │
//! │  4. STREAM                                                             │
//! │     DownloadStream owns the temp file; dropping it deletes the file,   │
//! │     whether the body finished, the client went away or it never ran.   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The blob store is only read here. Storage paths never leave this module.

use futures_util::Stream;
use std::io::{Seek, Write};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tempfile::TempPath;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

use crate::blob::BlobStore;
use crate::error::{ServiceError, ServiceResult};
use crate::pdf::{self, WatermarkError};
use folio_core::access::{self, AccessDecision, ItemView};
use folio_core::watermark::mark_text;
use folio_core::{
    Caller, CoreError, DownloadLogEntry, DownloadOutcome, Item, NewDownloadLogEntry, Order, OrderStatus,
    RequestContext,
};
use folio_db::{Database, DbError};

/// A watermarked file ready to be streamed to the caller.
///
/// The staged copy on disk is deleted when this value is dropped.
#[derive(Debug)]
pub struct DownloadStream {
    /// Suggested file name for the response, e.g. `Linear Algebra.pdf`.
    pub file_name: String,

    /// Size of the watermarked file in bytes.
    pub len: u64,

    /// `None` for free downloads.
    pub order_id: Option<i64>,

    /// The completed log entry, when bookkeeping succeeded.
    pub log_entry: Option<DownloadLogEntry>,

    // Field order matters: the open handle drops before the path is removed
    inner: ReaderStream<File>,
    staged: TempPath,
}

impl Stream for DownloadStream {
    type Item = <ReaderStream<File> as Stream>::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

/// Watermarked bytes staged in a temp file.
struct Staged {
    file: std::fs::File,
    path: TempPath,
    len: u64,
}

/// Download and access operations.
#[derive(Clone)]
pub struct FulfillmentService {
    db: Database,
    blobs: Arc<dyn BlobStore>,
}

impl FulfillmentService {
    pub fn new(db: Database, blobs: Arc<dyn BlobStore>) -> Self {
        FulfillmentService { db, blobs }
    }

    /// Downloads the item of one of the caller's paid orders.
    pub async fn download(
        &self,
        caller: &Caller,
        order_id: i64,
        ctx: &RequestContext,
    ) -> ServiceResult<DownloadStream> {
        let order = self.db.orders().get_owned(order_id, &caller.user_id).await?;

        if order.status != OrderStatus::Paid {
            return Err(CoreError::PaymentIncomplete {
                order_id,
                status: order.status,
            }
            .into());
        }

        let item = self.db.items().get(&order.item_id).await?;
        let staged = match self.stage(&item, caller).await {
            Ok(staged) => staged,
            Err(err) => {
                self.log_failure(Some(order.id), caller, &item, ctx, &err).await;
                return Err(err);
            }
        };

        let entry = log_entry(Some(order.id), caller, &item, ctx, DownloadOutcome::Completed, None);
        let log_entry = match self.db.orders().record_download(order.id, &entry).await {
            Ok((order, logged)) => {
                info!(
                    order_id = order.id,
                    user_id = %caller.user_id,
                    item_id = %item.id,
                    downloads = order.download_count,
                    "Download delivered"
                );
                Some(logged)
            }
            // The order left `paid` after the check above
            Err(DbError::Rule(rule)) => return Err(rule.into()),
            Err(err) => {
                error!(
                    order_id = order.id,
                    user_id = %caller.user_id,
                    item_id = %item.id,
                    error = %err,
                    "Download bookkeeping failed; serving file anyway"
                );
                None
            }
        };

        Ok(into_stream(&item, Some(order.id), log_entry, staged))
    }

    /// Downloads a free item. No order is involved.
    pub async fn download_free(
        &self,
        caller: &Caller,
        item_id: &str,
        ctx: &RequestContext,
    ) -> ServiceResult<DownloadStream> {
        let item = self.db.items().get(item_id).await?;

        if !item.is_free() {
            return Err(unavailable(&item, "item is not free"));
        }
        if !access::decide(&item, Some(&caller.user_id), None).granted {
            return Err(unavailable(&item, "item is not published"));
        }

        let staged = match self.stage(&item, caller).await {
            Ok(staged) => staged,
            Err(err) => {
                self.log_failure(None, caller, &item, ctx, &err).await;
                return Err(err);
            }
        };

        let entry = log_entry(None, caller, &item, ctx, DownloadOutcome::Completed, None);
        let log_entry = match self.db.downloads().append(&entry).await {
            Ok(logged) => {
                info!(user_id = %caller.user_id, item_id = %item.id, "Free download delivered");
                Some(logged)
            }
            Err(err) => {
                error!(
                    user_id = %caller.user_id,
                    item_id = %item.id,
                    error = %err,
                    "Download log append failed; serving file anyway"
                );
                None
            }
        };

        Ok(into_stream(&item, None, log_entry, staged))
    }

    /// Whether `caller` (or an anonymous visitor) may download an item.
    pub async fn check_access(&self, caller: Option<&Caller>, item_id: &str) -> ServiceResult<AccessDecision> {
        let (item, purchase) = self.item_with_purchase(caller, item_id).await?;
        let requester = caller.map(|c| c.user_id.as_str());
        Ok(access::decide(&item, requester, purchase.as_ref()))
    }

    /// The item as the caller may see it. Storage details only when entitled.
    pub async fn item_view(&self, caller: Option<&Caller>, item_id: &str) -> ServiceResult<ItemView> {
        let (item, purchase) = self.item_with_purchase(caller, item_id).await?;
        let requester = caller.map(|c| c.user_id.as_str());
        Ok(access::view(&item, requester, purchase.as_ref()))
    }

    async fn item_with_purchase(&self, caller: Option<&Caller>, item_id: &str) -> ServiceResult<(Item, Option<Order>)> {
        let item = self.db.items().get(item_id).await?;
        let purchase = match caller {
            Some(caller) => self.db.orders().find_for(&caller.user_id, item_id).await?,
            None => None,
        };
        Ok((item, purchase))
    }

    /// Fetches the source, watermarks it and writes it to a temp file.
    async fn stage(&self, item: &Item, caller: &Caller) -> ServiceResult<Staged> {
        let source = self.blobs.get(&item.storage_path).await?;
        let text = mark_text(&caller.display_name, &caller.email);

        let staged = tokio::task::spawn_blocking(move || -> Result<Staged, WatermarkError> {
            let marked = pdf::watermark(&source, &text)?;

            let mut temp = tempfile::Builder::new()
                .prefix("folio-dl-")
                .suffix(".pdf")
                .tempfile()?;
            temp.write_all(&marked)?;
            temp.flush()?;
            temp.rewind()?;

            let (file, path) = temp.into_parts();
            Ok(Staged {
                file,
                path,
                len: marked.len() as u64,
            })
        })
        .await??;

        debug!(item_id = %item.id, bytes = staged.len, path = %staged.path.display(), "Download staged");
        Ok(staged)
    }

    async fn log_failure(
        &self,
        order_id: Option<i64>,
        caller: &Caller,
        item: &Item,
        ctx: &RequestContext,
        err: &ServiceError,
    ) {
        warn!(order_id, user_id = %caller.user_id, item_id = %item.id, error = %err, "Download failed");

        let entry = log_entry(
            order_id,
            caller,
            item,
            ctx,
            DownloadOutcome::Failed,
            Some(err.to_string()),
        );
        if let Err(log_err) = self.db.downloads().append(&entry).await {
            error!(
                order_id,
                user_id = %caller.user_id,
                item_id = %item.id,
                error = %log_err,
                "Failed download could not be logged"
            );
        }
    }
}

fn log_entry(
    order_id: Option<i64>,
    caller: &Caller,
    item: &Item,
    ctx: &RequestContext,
    outcome: DownloadOutcome,
    detail: Option<String>,
) -> NewDownloadLogEntry {
    NewDownloadLogEntry {
        order_id,
        user_id: caller.user_id.clone(),
        item_id: item.id.clone(),
        ip: ctx.ip.clone(),
        user_agent: ctx.user_agent.clone(),
        outcome,
        detail,
    }
}

fn unavailable(item: &Item, reason: &str) -> ServiceError {
    CoreError::ItemUnavailable {
        item_id: item.id.clone(),
        reason: reason.to_string(),
    }
    .into()
}

fn into_stream(item: &Item, order_id: Option<i64>, log_entry: Option<DownloadLogEntry>, staged: Staged) -> DownloadStream {
    DownloadStream {
        file_name: file_name(&item.title),
        len: staged.len,
        order_id,
        log_entry,
        inner: ReaderStream::new(File::from_std(staged.file)),
        staged: staged.path,
    }
}

/// Title reduced to characters safe in a Content-Disposition header.
fn file_name(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| if c.is_alphanumeric() || " -_.()".contains(c) { c } else { '_' })
        .collect();

    match cleaned.trim() {
        "" => "download.pdf".to_string(),
        name => format!("{}.pdf", name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::services::test_support::{buyer, publish, services};
    use futures_util::StreamExt;
    use folio_core::access::AccessReason;

    async fn collect(mut stream: DownloadStream) -> (Vec<u8>, DownloadStream) {
        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.unwrap());
        }
        (body, stream)
    }

    fn ctx() -> RequestContext {
        RequestContext {
            ip: Some("203.0.113.9".to_string()),
            user_agent: Some("test-agent".to_string()),
        }
    }

    #[tokio::test]
    async fn test_free_download_logs_without_order() {
        let (services, blobs) = services().await;
        publish(&services, &blobs, "free", 0).await;

        let alice = buyer("alice");
        let stream = services.downloads().download_free(&alice, "free", &ctx()).await.unwrap();
        assert_eq!(stream.order_id, None);
        assert_eq!(stream.file_name, "Notes free.pdf");

        let (body, stream) = collect(stream).await;
        assert!(body.starts_with(b"%PDF"));
        assert_eq!(body.len() as u64, stream.len);

        let log = services.db().downloads().list_for_user_item("alice", "free").await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].order_id, None);
        assert_eq!(log[0].outcome, DownloadOutcome::Completed);
        assert_eq!(log[0].ip.as_deref(), Some("203.0.113.9"));
    }

    #[tokio::test]
    async fn test_paid_download_counts() {
        let (services, blobs) = services().await;
        publish(&services, &blobs, "a", 9_900).await;

        let alice = buyer("alice");
        let order = services.checkout().buy_now(&alice, "a").await.unwrap().order;
        services.admin().approve(order.id, "staff-1", None).await.unwrap();

        for _ in 0..2 {
            let stream = services.downloads().download(&alice, order.id, &ctx()).await.unwrap();
            assert_eq!(stream.log_entry.as_ref().map(|e| e.order_id), Some(Some(order.id)));
            collect(stream).await;
        }

        let stored = services.db().orders().get(order.id).await.unwrap();
        assert_eq!(stored.download_count, 2);
        assert!(stored.last_download_at.is_some());
        assert_eq!(services.db().downloads().list_for_order(order.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_pending_order_cannot_download() {
        let (services, blobs) = services().await;
        publish(&services, &blobs, "a", 9_900).await;

        let alice = buyer("alice");
        let order = services.checkout().buy_now(&alice, "a").await.unwrap().order;

        let err = services.downloads().download(&alice, order.id, &ctx()).await.unwrap_err();
        assert!(matches!(
            err.rule(),
            Some(CoreError::PaymentIncomplete { status: OrderStatus::Pending, .. })
        ));
        assert!(services.db().downloads().list_for_order(order.id).await.unwrap().is_empty());

        let err = services.downloads().download(&buyer("mallory"), order.id, &ctx()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_broken_source_logs_failure() {
        let (services, blobs) = services().await;
        let item = publish(&services, &blobs, "a", 9_900).await;
        blobs.put(b"not a pdf".to_vec(), &item.storage_path).await.unwrap();

        let alice = buyer("alice");
        let order = services.checkout().buy_now(&alice, "a").await.unwrap().order;
        services.admin().approve(order.id, "staff-1", None).await.unwrap();

        let err = services.downloads().download(&alice, order.id, &ctx()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalService);

        let log = services.db().downloads().list_for_order(order.id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].outcome, DownloadOutcome::Failed);
        assert!(log[0].detail.is_some());

        let stored = services.db().orders().get(order.id).await.unwrap();
        assert_eq!(stored.download_count, 0);
    }

    #[tokio::test]
    async fn test_staged_file_removed_on_drop() {
        let (services, blobs) = services().await;
        publish(&services, &blobs, "free", 0).await;

        let stream = services.downloads().download_free(&buyer("alice"), "free", &ctx()).await.unwrap();
        let path = stream.staged.to_path_buf();
        assert!(path.exists());

        // Abandoned before the first chunk, as on a client disconnect
        drop(stream);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_paid_item_is_not_free() {
        let (services, blobs) = services().await;
        publish(&services, &blobs, "a", 9_900).await;

        let err = services.downloads().download_free(&buyer("alice"), "a", &ctx()).await.unwrap_err();
        assert!(matches!(err.rule(), Some(CoreError::ItemUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_check_access_reasons() {
        let (services, blobs) = services().await;
        publish(&services, &blobs, "a", 9_900).await;
        publish(&services, &blobs, "free", 0).await;

        let downloads = services.downloads();
        let alice = buyer("alice");

        assert_eq!(downloads.check_access(None, "a").await.unwrap().reason, AccessReason::Anonymous);
        assert_eq!(
            downloads.check_access(Some(&alice), "a").await.unwrap().reason,
            AccessReason::NotPurchased
        );
        assert!(downloads.check_access(Some(&alice), "free").await.unwrap().granted);

        let order = services.checkout().buy_now(&alice, "a").await.unwrap().order;
        assert_eq!(
            downloads.check_access(Some(&alice), "a").await.unwrap().reason,
            AccessReason::PaymentPending
        );

        services.admin().approve(order.id, "staff-1", None).await.unwrap();
        let view = downloads.item_view(Some(&alice), "a").await.unwrap();
        assert!(view.owned);
        assert_eq!(view.access_reason, AccessReason::Purchased);
        assert_eq!(view.storage_path.as_deref(), Some("items/a.pdf"));

        let anonymous = downloads.item_view(None, "a").await.unwrap();
        assert!(anonymous.storage_path.is_none());

        let creator = buyer("creator-1");
        assert_eq!(
            downloads.check_access(Some(&creator), "a").await.unwrap().reason,
            AccessReason::Creator
        );
    }
}
