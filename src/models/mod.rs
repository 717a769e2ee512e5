pub mod event;
pub mod page;
pub mod registration;
pub mod user;

pub use event::{Event, EventDetail, EventFilter, EventOrdering, EventSummary, EventView};
pub use page::{Page, PageParams, PageRequest};
pub use registration::{Registration, RegistrationScope, RegistrationView};
pub use user::{OrganizerInfo, User, UserProfile};
