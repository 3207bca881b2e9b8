pub mod domain;
pub mod ports;
pub mod rules;
pub mod validation;

pub use domain::{
    ParseEnumError,
    Client, ClientContact, ClientDraft, ClientFilter, ClientPatch, ClientStats, ClientSummary,
    ClientType, ContactDraft, ContactPatch, Invoice, InvoiceDraft, InvoiceFilter, InvoicePatch,
    InvoiceStatus, Language, NewUser, Page, PageRequest, Payment, PaymentDraft, PaymentFilter,
    PaymentMethod, PaymentPatch, PaymentStatus, PrimaryContactSummary, ProfilePatch, Role,
    SortOrder, TokenKind, User, UserCredentials, UserFilter, UserPatch, UserProfile,
};
pub use ports::{DatabaseService, PortError, PortResult};
pub use validation::ValidationErrors;
