pub mod error;
pub mod supabase;

pub use error::PostgrestError;
pub use supabase::SupabaseClient;
