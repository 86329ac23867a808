use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procura_catalog::VendorId;
use procura_core::{
    Aggregate, AggregateRoot, AuthorId, DomainError, Entity, ItemId, Money, ProductId, PropertyId,
    TenantId,
};
use procura_events::Event;
use procura_identity::CartId;
use procura_scheduling::{OccurrenceFired, RecurrenceDescriptor};

/// Cart kind. Recurring and Scheduled carts are templates carrying a
/// recurrence descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CartType {
    Standard,
    Recurring,
    /// One-shot template: fires once, on its first occurrence.
    Scheduled,
}

impl CartType {
    pub fn is_template(self) -> bool {
        matches!(self, CartType::Recurring | CartType::Scheduled)
    }
}

/// Cart status lifecycle: `Draft ⇄ Ready for Review → Submitted`, plus
/// `Submitted → Draft` on explicit revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CartStatus {
    Draft,
    #[serde(rename = "Ready for Review")]
    ReadyForReview,
    Submitted,
}

impl CartStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CartStatus::Draft => "Draft",
            CartStatus::ReadyForReview => "Ready for Review",
            CartStatus::Submitted => "Submitted",
        }
    }
}

impl core::fmt::Display for CartStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for CartStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Draft" => Ok(CartStatus::Draft),
            "Ready for Review" => Ok(CartStatus::ReadyForReview),
            "Submitted" => Ok(CartStatus::Submitted),
            other => Err(DomainError::validation(format!("unknown cart status: {other}"))),
        }
    }
}

/// Cart line. `product_id` is a required catalog key; there is no SKU/name
/// fallback matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub item_id: ItemId,
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    /// Always > 0; setting zero removes the item.
    pub quantity: u32,
    pub unit_price: Money,
    pub note: Option<String>,
    pub vendor_hint: Option<VendorId>,
}

impl CartItem {
    pub fn total_price(&self) -> Money {
        self.unit_price.times(self.quantity)
    }
}

impl Entity for CartItem {
    type Id = ItemId;

    fn id(&self) -> &Self::Id {
        &self.item_id
    }
}

/// Aggregate root: Cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cart {
    id: CartId,
    tenant_id: Option<TenantId>,
    author_id: Option<AuthorId>,
    name: String,
    cart_type: CartType,
    status: CartStatus,
    items: Vec<CartItem>,
    recurrence: Option<RecurrenceDescriptor>,
    property_id: Option<PropertyId>,
    version: u64,
    created: bool,
}

impl Cart {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: CartId) -> Self {
        Self {
            id,
            tenant_id: None,
            author_id: None,
            name: String::new(),
            cart_type: CartType::Standard,
            status: CartStatus::Draft,
            items: Vec::new(),
            recurrence: None,
            property_id: None,
            version: 0,
            created: false,
        }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn author_id(&self) -> Option<&AuthorId> {
        self.author_id.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cart_type(&self) -> CartType {
        self.cart_type
    }

    pub fn status(&self) -> CartStatus {
        self.status
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn recurrence(&self) -> Option<&RecurrenceDescriptor> {
        self.recurrence.as_ref()
    }

    pub fn property_id(&self) -> Option<PropertyId> {
        self.property_id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn total(&self) -> Money {
        self.items.iter().map(CartItem::total_price).sum()
    }

    pub fn is_editable(&self) -> bool {
        self.status != CartStatus::Submitted
    }
}

impl AggregateRoot for Cart {
    type Id = CartId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateCart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCart {
    pub tenant_id: TenantId,
    pub cart_id: CartId,
    pub author_id: AuthorId,
    pub name: String,
    pub cart_type: CartType,
    /// Required for Recurring/Scheduled carts, rejected for Standard ones.
    pub recurrence: Option<RecurrenceDescriptor>,
    pub property_id: Option<PropertyId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddItem (not allowed once submitted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItem {
    pub tenant_id: TenantId,
    pub cart_id: CartId,
    pub item: CartItem,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateItemQuantity. A quantity of zero removes the item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateItemQuantity {
    pub tenant_id: TenantId,
    pub cart_id: CartId,
    pub item_id: ItemId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveItem {
    pub tenant_id: TenantId,
    pub cart_id: CartId,
    pub item_id: ItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkReadyForReview (Draft → Ready for Review).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkReadyForReview {
    pub tenant_id: TenantId,
    pub cart_id: CartId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReturnToDraft (Ready for Review → Draft).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnToDraft {
    pub tenant_id: TenantId,
    pub cart_id: CartId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Submit (Draft | Ready for Review → Submitted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submit {
    pub tenant_id: TenantId,
    pub cart_id: CartId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RevertToDraft (Submitted → Draft, always permitted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertToDraft {
    pub tenant_id: TenantId,
    pub cart_id: CartId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordOccurrence (template carts only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOccurrence {
    pub tenant_id: TenantId,
    pub cart_id: CartId,
    pub fired: OccurrenceFired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CartCommand {
    CreateCart(CreateCart),
    AddItem(AddItem),
    UpdateItemQuantity(UpdateItemQuantity),
    RemoveItem(RemoveItem),
    MarkReadyForReview(MarkReadyForReview),
    ReturnToDraft(ReturnToDraft),
    Submit(Submit),
    RevertToDraft(RevertToDraft),
    RecordOccurrence(RecordOccurrence),
}

/// Event: CartCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartCreated {
    pub tenant_id: TenantId,
    pub cart_id: CartId,
    pub author_id: AuthorId,
    pub name: String,
    pub cart_type: CartType,
    pub recurrence: Option<RecurrenceDescriptor>,
    pub property_id: Option<PropertyId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAdded {
    pub cart_id: CartId,
    pub item: CartItem,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemQuantityChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemQuantityChanged {
    pub cart_id: CartId,
    pub item_id: ItemId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRemoved {
    pub cart_id: CartId,
    pub item_id: ItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CartSubmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSubmitted {
    pub cart_id: CartId,
    pub item_count: usize,
    pub total: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RecurrenceFired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceFired {
    pub cart_id: CartId,
    pub fired: OccurrenceFired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CartEvent {
    CartCreated(CartCreated),
    ItemAdded(ItemAdded),
    ItemQuantityChanged(ItemQuantityChanged),
    ItemRemoved(ItemRemoved),
    MarkedReadyForReview {
        cart_id: CartId,
        occurred_at: DateTime<Utc>,
    },
    ReturnedToDraft {
        cart_id: CartId,
        occurred_at: DateTime<Utc>,
    },
    CartSubmitted(CartSubmitted),
    SubmissionReverted {
        cart_id: CartId,
        occurred_at: DateTime<Utc>,
    },
    RecurrenceFired(RecurrenceFired),
}

impl Event for CartEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CartEvent::CartCreated(_) => "carts.cart.created",
            CartEvent::ItemAdded(_) => "carts.cart.item_added",
            CartEvent::ItemQuantityChanged(_) => "carts.cart.item_quantity_changed",
            CartEvent::ItemRemoved(_) => "carts.cart.item_removed",
            CartEvent::MarkedReadyForReview { .. } => "carts.cart.ready_for_review",
            CartEvent::ReturnedToDraft { .. } => "carts.cart.returned_to_draft",
            CartEvent::CartSubmitted(_) => "carts.cart.submitted",
            CartEvent::SubmissionReverted { .. } => "carts.cart.submission_reverted",
            CartEvent::RecurrenceFired(_) => "carts.cart.recurrence_fired",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CartEvent::CartCreated(e) => e.occurred_at,
            CartEvent::ItemAdded(e) => e.occurred_at,
            CartEvent::ItemQuantityChanged(e) => e.occurred_at,
            CartEvent::ItemRemoved(e) => e.occurred_at,
            CartEvent::MarkedReadyForReview { occurred_at, .. }
            | CartEvent::ReturnedToDraft { occurred_at, .. }
            | CartEvent::SubmissionReverted { occurred_at, .. } => *occurred_at,
            CartEvent::CartSubmitted(e) => e.occurred_at,
            CartEvent::RecurrenceFired(e) => e.fired.fired_at,
        }
    }
}

impl Aggregate for Cart {
    type Command = CartCommand;
    type Event = CartEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CartEvent::CartCreated(e) => {
                self.id = e.cart_id.clone();
                self.tenant_id = Some(e.tenant_id);
                self.author_id = Some(e.author_id.clone());
                self.name = e.name.clone();
                self.cart_type = e.cart_type;
                self.recurrence = e.recurrence.clone();
                self.property_id = e.property_id;
                self.status = CartStatus::Draft;
                self.items.clear();
                self.created = true;
            }
            CartEvent::ItemAdded(e) => {
                self.items.push(e.item.clone());
            }
            CartEvent::ItemQuantityChanged(e) => {
                if let Some(item) = self.items.iter_mut().find(|i| i.item_id == e.item_id) {
                    item.quantity = e.quantity;
                }
            }
            CartEvent::ItemRemoved(e) => {
                self.items.retain(|i| i.item_id != e.item_id);
            }
            CartEvent::MarkedReadyForReview { .. } => {
                self.status = CartStatus::ReadyForReview;
            }
            CartEvent::ReturnedToDraft { .. } | CartEvent::SubmissionReverted { .. } => {
                self.status = CartStatus::Draft;
            }
            CartEvent::CartSubmitted(_) => {
                self.status = CartStatus::Submitted;
            }
            CartEvent::RecurrenceFired(e) => {
                if let Some(recurrence) = self.recurrence.as_mut() {
                    // Checked in handle; a replayed duplicate is simply ignored.
                    let _ = recurrence.record_firing(e.fired.clone());
                }
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CartCommand::CreateCart(cmd) => self.handle_create(cmd),
            CartCommand::AddItem(cmd) => self.handle_add_item(cmd),
            CartCommand::UpdateItemQuantity(cmd) => self.handle_update_quantity(cmd),
            CartCommand::RemoveItem(cmd) => self.handle_remove_item(cmd),
            CartCommand::MarkReadyForReview(cmd) => self.handle_ready_for_review(cmd),
            CartCommand::ReturnToDraft(cmd) => self.handle_return_to_draft(cmd),
            CartCommand::Submit(cmd) => self.handle_submit(cmd),
            CartCommand::RevertToDraft(cmd) => self.handle_revert(cmd),
            CartCommand::RecordOccurrence(cmd) => self.handle_record_occurrence(cmd),
        }
    }
}

impl Cart {
    fn ensure_existing(&self, tenant_id: TenantId, cart_id: &CartId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if &self.id != cart_id {
            return Err(DomainError::invariant("cart_id mismatch"));
        }
        Ok(())
    }

    fn ensure_editable(&self) -> Result<(), DomainError> {
        if !self.is_editable() {
            return Err(DomainError::guard(
                "cart is submitted; revert to draft before editing items",
            ));
        }
        Ok(())
    }

    fn find_item(&self, item_id: ItemId) -> Result<&CartItem, DomainError> {
        procura_core::entity::find_by_id(&self.items, &item_id).ok_or_else(DomainError::not_found)
    }

    fn handle_create(&self, cmd: &CreateCart) -> Result<Vec<CartEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("cart already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("cart name must not be empty"));
        }
        match (cmd.cart_type.is_template(), cmd.recurrence.is_some()) {
            (true, false) => {
                return Err(DomainError::validation(
                    "recurring and scheduled carts require a recurrence descriptor",
                ));
            }
            (false, true) => {
                return Err(DomainError::validation(
                    "standard carts cannot carry a recurrence descriptor",
                ));
            }
            _ => {}
        }

        Ok(vec![CartEvent::CartCreated(CartCreated {
            tenant_id: cmd.tenant_id,
            cart_id: cmd.cart_id.clone(),
            author_id: cmd.author_id.clone(),
            name: cmd.name.clone(),
            cart_type: cmd.cart_type,
            recurrence: cmd.recurrence.clone(),
            property_id: cmd.property_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_item(&self, cmd: &AddItem) -> Result<Vec<CartEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, &cmd.cart_id)?;
        self.ensure_editable()?;

        if cmd.item.quantity == 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if self.items.iter().any(|i| i.item_id == cmd.item.item_id) {
            return Err(DomainError::conflict("item already in cart"));
        }

        Ok(vec![CartEvent::ItemAdded(ItemAdded {
            cart_id: cmd.cart_id.clone(),
            item: cmd.item.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_quantity(
        &self,
        cmd: &UpdateItemQuantity,
    ) -> Result<Vec<CartEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, &cmd.cart_id)?;
        self.ensure_editable()?;
        let item = self.find_item(cmd.item_id)?;

        if cmd.quantity == 0 {
            return Ok(vec![CartEvent::ItemRemoved(ItemRemoved {
                cart_id: cmd.cart_id.clone(),
                item_id: cmd.item_id,
                occurred_at: cmd.occurred_at,
            })]);
        }
        if item.quantity == cmd.quantity {
            return Ok(vec![]);
        }

        Ok(vec![CartEvent::ItemQuantityChanged(ItemQuantityChanged {
            cart_id: cmd.cart_id.clone(),
            item_id: cmd.item_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_item(&self, cmd: &RemoveItem) -> Result<Vec<CartEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, &cmd.cart_id)?;
        self.ensure_editable()?;
        self.find_item(cmd.item_id)?;

        Ok(vec![CartEvent::ItemRemoved(ItemRemoved {
            cart_id: cmd.cart_id.clone(),
            item_id: cmd.item_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_ready_for_review(
        &self,
        cmd: &MarkReadyForReview,
    ) -> Result<Vec<CartEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, &cmd.cart_id)?;
        if self.status != CartStatus::Draft {
            return Err(DomainError::guard(format!(
                "only draft carts can be marked ready for review (status: {})",
                self.status
            )));
        }

        Ok(vec![CartEvent::MarkedReadyForReview {
            cart_id: cmd.cart_id.clone(),
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_return_to_draft(&self, cmd: &ReturnToDraft) -> Result<Vec<CartEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, &cmd.cart_id)?;
        if self.status != CartStatus::ReadyForReview {
            return Err(DomainError::guard(format!(
                "only carts ready for review can return to draft (status: {})",
                self.status
            )));
        }

        Ok(vec![CartEvent::ReturnedToDraft {
            cart_id: cmd.cart_id.clone(),
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_submit(&self, cmd: &Submit) -> Result<Vec<CartEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, &cmd.cart_id)?;

        if self.status == CartStatus::Submitted {
            return Err(DomainError::guard("cart is already submitted"));
        }
        if self.items.is_empty() {
            return Err(DomainError::guard("cart has no items"));
        }

        Ok(vec![CartEvent::CartSubmitted(CartSubmitted {
            cart_id: cmd.cart_id.clone(),
            item_count: self.items.len(),
            total: self.total(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_revert(&self, cmd: &RevertToDraft) -> Result<Vec<CartEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, &cmd.cart_id)?;

        if self.status != CartStatus::Submitted {
            return Err(DomainError::guard(format!(
                "only submitted carts can be reverted to draft (status: {})",
                self.status
            )));
        }

        Ok(vec![CartEvent::SubmissionReverted {
            cart_id: cmd.cart_id.clone(),
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_record_occurrence(
        &self,
        cmd: &RecordOccurrence,
    ) -> Result<Vec<CartEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, &cmd.cart_id)?;
        let Some(recurrence) = self.recurrence.as_ref() else {
            return Err(DomainError::validation("cart is not a recurring template"));
        };

        // Dry-run against a copy so the check and `apply` share one rule.
        recurrence.clone().record_firing(cmd.fired.clone())?;

        Ok(vec![CartEvent::RecurrenceFired(RecurrenceFired {
            cart_id: cmd.cart_id.clone(),
            fired: cmd.fired.clone(),
        })])
    }
}
