pub mod orph_core;
