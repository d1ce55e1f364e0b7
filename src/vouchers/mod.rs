//! Karma vouchers: code sequencing, spreadsheet import, persistence and
//! recipient notification.

use std::sync::Arc;

pub mod batch;
pub mod code;
pub mod directory;
pub mod export;
pub mod import;
pub mod mail;
pub mod notify;
pub mod render;
pub mod sheet;
pub mod store;
pub mod validate;

pub use import::{ImportError, ImportReport, VoucherImporter};
pub use notify::{DispatchPolicy, NotificationDispatcher};
pub use store::{PgVoucherStore, VoucherStore};

/// Shared handles used by the voucher routes.
#[derive(Clone)]
pub struct VoucherServices {
    pub store: Arc<dyn VoucherStore>,
    pub dispatcher: Arc<NotificationDispatcher>,
}

impl VoucherServices {
    pub fn new(store: Arc<dyn VoucherStore>, dispatcher: NotificationDispatcher) -> Self {
        Self {
            store,
            dispatcher: Arc::new(dispatcher),
        }
    }

    pub fn importer(&self) -> VoucherImporter<'_> {
        VoucherImporter::new(self.store.as_ref(), self.dispatcher.as_ref())
    }
}
