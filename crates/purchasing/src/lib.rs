//! Purchasing domain module (orders and purchase orders, event-sourced).
//!
//! An `Order` snapshots a submitted cart and owns the vendor-scoped
//! `PurchaseOrder`s cut from it. Pure domain logic: no IO, no storage.

pub mod assignment;
pub mod order;
pub mod purchase_order;

pub use assignment::{
    AssignmentPlan, AssignmentSession, CheaperVendorAdvisory, cheaper_vendor_advisories,
    plan_purchase_orders,
};
pub use order::{
    AcknowledgeBilling, ApprovalDecision, DecideApproval, EvaluateCompletion,
    IssuePurchaseOrders, MarkInTransit, MarkPurchased, MarkReceived, Order, OrderCommand,
    OrderEvent, OrderPlaced, OrderStatus, PaymentRecorded, PlaceOrder,
    PurchaseOrderDetailsUpdated, PurchaseOrderShipped, PurchaseOrdersIssued, RecordPayment,
    RefreshSnapshot, RequestApproval, SnapshotRefreshed, UpdatePurchaseOrderDetails,
};
pub use purchase_order::{
    DocumentRef, DraftPurchaseOrder, PaymentStatus, PurchaseOrder, PurchaseOrderDetails,
    PurchaseOrderItem, PurchaseOrderStatus,
};
