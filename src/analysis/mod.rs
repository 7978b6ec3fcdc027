pub mod critical_path;
