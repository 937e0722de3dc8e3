//! Book listings: the registry the trade workflow depends on, and the catalog
//! owners use to manage and browse listings.
use crate::blob::{self, ObjectStore};
use crate::error::{Result, TradeError};
use crate::identity::Identity;
use crate::store::{Collection, Record, Step};
use crate::types::{BookId, BookStatus, TimeStamp, UserId};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Book {
    #[n(0)]
    pub id: BookId,
    #[n(1)]
    pub title: String,
    #[n(2)]
    pub author: String,
    #[n(3)]
    pub description: String,
    #[n(4)]
    pub price_cents: Option<u64>, // Use integers for currency
    #[n(5)]
    pub book_value: u32,
    #[n(6)]
    pub condition: String,
    #[n(7)]
    pub category: String,
    #[n(8)]
    pub is_for_sale: bool,
    #[n(9)]
    pub is_for_trade: bool,
    #[n(10)]
    pub image_urls: Vec<String>,
    #[n(11)]
    pub owner_id: UserId,
    #[n(12)]
    pub owner_display_name: String,
    #[n(13)]
    pub location: Option<String>,
    #[n(14)]
    pub status: BookStatus,
    #[n(15)]
    pub created_at: TimeStamp<Utc>,
    #[n(16)]
    pub updated_at: TimeStamp<Utc>,
}

impl Record for Book {
    type Id = BookId;
    const COLLECTION: &'static str = "books";
    const HRP: &'static str = "book_";

    fn id(&self) -> &BookId {
        &self.id
    }
    fn set_id(&mut self, id: BookId) {
        self.id = id;
    }
}

/// What the trade workflow needs from the listings: a point read and a status flip.
pub trait BookRegistry: Send + Sync {
    fn get_book(&self, id: &BookId) -> Result<Book>;
    fn set_book_status(&self, id: &BookId, status: BookStatus) -> Result<()>;
}

impl BookRegistry for Collection<Book> {
    fn get_book(&self, id: &BookId) -> Result<Book> {
        self.fetch(id)
    }

    fn set_book_status(&self, id: &BookId, status: BookStatus) -> Result<()> {
        let updated = self.update(id, |book| {
            let mut next = book.clone();
            next.status = status;
            next.updated_at = TimeStamp::now();
            Step::Write(next, ())
        })?;
        updated.ok_or_else(|| TradeError::not_found("book", id))
    }
}

/// Listing draft used by [`Catalog::add_book`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NewBook {
    pub title: String,
    pub author: String,
    pub description: String,
    pub price_cents: Option<u64>,
    pub book_value: u32,
    pub condition: String,
    pub category: String,
    pub is_for_sale: bool,
    pub is_for_trade: bool,
    pub owner_display_name: String,
    pub location: Option<String>,
}

impl NewBook {
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            ..Self::default()
        }
    }
    pub fn set_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }
    pub fn set_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = condition.into();
        self
    }
    pub fn set_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
    pub fn for_trade(mut self) -> Self {
        self.is_for_trade = true;
        self
    }
    pub fn for_sale(mut self, price_cents: u64) -> Self {
        self.is_for_sale = true;
        self.price_cents = Some(price_cents);
        self
    }
    pub fn set_value(mut self, book_value: u32) -> Self {
        self.book_value = book_value;
        self
    }
    pub fn set_owner_display_name(mut self, name: impl Into<String>) -> Self {
        self.owner_display_name = name.into();
        self
    }
    pub fn set_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Field-level listing edit. `None` leaves the stored value alone.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BookUpdate {
    pub title: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub price_cents: Option<Option<u64>>,
    pub condition: Option<String>,
    pub category: Option<String>,
    pub is_for_sale: Option<bool>,
    pub is_for_trade: Option<bool>,
    pub location: Option<Option<String>>,
}

impl BookUpdate {
    fn apply(&self, book: &mut Book) {
        if let Some(v) = &self.title {
            book.title = v.clone();
        }
        if let Some(v) = &self.author {
            book.author = v.clone();
        }
        if let Some(v) = &self.description {
            book.description = v.clone();
        }
        if let Some(v) = self.price_cents {
            book.price_cents = v;
        }
        if let Some(v) = &self.condition {
            book.condition = v.clone();
        }
        if let Some(v) = &self.category {
            book.category = v.clone();
        }
        if let Some(v) = self.is_for_sale {
            book.is_for_sale = v;
        }
        if let Some(v) = self.is_for_trade {
            book.is_for_trade = v;
        }
        if let Some(v) = &self.location {
            book.location = v.clone();
        }
    }
}

/// Browse filter. Text matches title or author, ignoring case.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BookFilter {
    pub text: Option<String>,
    pub category: Option<String>,
    pub trade_only: bool,
    pub sale_only: bool,
}

impl BookFilter {
    pub fn matches(&self, book: &Book) -> bool {
        if let Some(text) = self.text.as_deref().filter(|t| !t.is_empty()) {
            let needle = text.to_lowercase();
            if !book.title.to_lowercase().contains(&needle)
                && !book.author.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        if let Some(category) = self.category.as_deref().filter(|c| !c.is_empty()) {
            if book.category != category {
                return false;
            }
        }
        (!self.trade_only || book.is_for_trade) && (!self.sale_only || book.is_for_sale)
    }
}

/// An image to attach to a new listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl ImageUpload {
    pub fn jpeg(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: "image/jpeg".to_owned(),
        }
    }
}

fn newest_first(a: &Book, b: &Book) -> std::cmp::Ordering {
    b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id))
}

/// Listing management for the signed-in owner, plus browsing.
pub struct Catalog {
    books: Collection<Book>,
    blobs: Arc<dyn ObjectStore>,
    identity: Arc<dyn Identity>,
}

impl Catalog {
    pub fn new(
        books: Collection<Book>,
        blobs: Arc<dyn ObjectStore>,
        identity: Arc<dyn Identity>,
    ) -> Self {
        Self {
            books,
            blobs,
            identity,
        }
    }

    fn actor(&self) -> Result<UserId> {
        self.identity
            .current_user_id()
            .ok_or(TradeError::NotSignedIn)
    }

    fn owned(&self, action: &'static str, id: &BookId) -> Result<(UserId, Book)> {
        let actor = self.actor()?;
        let book = self.books.fetch(id)?;
        if book.owner_id != actor {
            return Err(TradeError::precondition(action, "only the owner can change a listing"));
        }
        Ok((actor, book))
    }

    /// Creates the listing, then uploads its images and records their URLs. A
    /// failed upload is skipped; the listing keeps the images that made it.
    pub fn add_book(&self, draft: NewBook, images: Vec<ImageUpload>) -> Result<Book> {
        let owner = self.actor()?;
        let now = TimeStamp::now();
        let mut book = self.books.create(Book {
            id: BookId::from(String::new()),
            title: draft.title,
            author: draft.author,
            description: draft.description,
            price_cents: draft.price_cents,
            book_value: draft.book_value,
            condition: draft.condition,
            category: draft.category,
            is_for_sale: draft.is_for_sale,
            is_for_trade: draft.is_for_trade,
            image_urls: Vec::new(),
            owner_id: owner.clone(),
            owner_display_name: draft.owner_display_name,
            location: draft.location,
            status: BookStatus::Available,
            created_at: now.clone(),
            updated_at: now,
        })?;

        if !images.is_empty() {
            for (n, image) in images.iter().enumerate() {
                let path = format!("book_images/{}/{n}", book.id);
                match self.blobs.put(&path, &image.bytes, &image.content_type) {
                    Ok(url) => book.image_urls.push(url),
                    Err(error) => warn!(book_id = %book.id, %path, %error, "image upload failed"),
                }
            }
            self.books.put(&book)?;
        }

        info!(book_id = %book.id, owner = %owner, "listing added");
        Ok(book)
    }

    pub fn update_listing(&self, id: &BookId, changes: &BookUpdate) -> Result<Book> {
        self.owned("update listing", id)?;
        let updated = self.books.update(id, |book| {
            let mut next = book.clone();
            changes.apply(&mut next);
            next.updated_at = TimeStamp::now();
            Step::Write(next.clone(), next)
        })?;
        updated.ok_or_else(|| TradeError::not_found("book", id))
    }

    /// Manual status change by the owner (e.g. reserving a book).
    pub fn set_status(&self, id: &BookId, status: BookStatus) -> Result<()> {
        self.owned("set status", id)?;
        self.books.set_book_status(id, status)
    }

    /// Removes the listing, then its images on a best-effort basis.
    pub fn remove_book(&self, id: &BookId) -> Result<()> {
        let (_, book) = self.owned("remove listing", id)?;
        self.books.delete(id)?;
        for url in &book.image_urls {
            let Some(path) = blob::path_from_url(url) else {
                continue;
            };
            if let Err(error) = self.blobs.delete(path) {
                warn!(book_id = %id, path, %error, "image cleanup failed");
            }
        }
        info!(book_id = %id, "listing removed");
        Ok(())
    }

    pub fn get(&self, id: &BookId) -> Result<Book> {
        self.books.fetch(id)
    }

    pub fn all(&self) -> Result<Vec<Book>> {
        self.books.query_ordered(|_| true, newest_first, None)
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<Book>> {
        self.books.query_ordered(|_| true, newest_first, Some(limit))
    }

    pub fn by_category(&self, category: &str, limit: usize) -> Result<Vec<Book>> {
        self.books
            .query_ordered(|b| b.category == category, newest_first, Some(limit))
    }

    pub fn by_owner(&self, owner: &UserId) -> Result<Vec<Book>> {
        self.books
            .query_ordered(|b| b.owner_id == *owner, newest_first, None)
    }

    pub fn search(&self, filter: &BookFilter) -> Result<Vec<Book>> {
        self.books
            .query_ordered(|b| filter.matches(b), newest_first, None)
    }
}
