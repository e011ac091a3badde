// Entity Models
//
// Statuses, companies and persons are owned by the deal source. The dashboard
// only ever reads them: identity (id) plus a display name.

pub mod status;
pub mod company;
pub mod person;

pub use status::{Status, StatusRegistry};
pub use company::Company;
pub use person::Person;
