// Mirrors the DDL in `database::tables`.

diesel::table! {
    repositories (id) {
        id -> Integer,
        name -> Text,
        created_at -> Timestamp,
    }
}

diesel::table! {
    packages (id) {
        id -> Integer,
        name -> Text,
        repository_name -> Text,
        meta -> Text,
        private -> Bool,
        source -> Text,
        downloads -> BigInt,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    releases (id) {
        id -> Integer,
        package_name -> Text,
        version -> Text,
        has_docs -> Bool,
        meta -> Text,
        requirements -> Text,
        retirement_reason -> Nullable<Text>,
        retirement_message -> Nullable<Text>,
        downloads -> BigInt,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    owners (id) {
        id -> Integer,
        package_name -> Text,
        username -> Text,
        level -> Text,
        created_at -> Timestamp,
    }
}

diesel::table! {
    package_downloads (id) {
        id -> Integer,
        package_name -> Text,
        day -> Date,
        downloads -> BigInt,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    repositories,
    packages,
    releases,
    owners,
    package_downloads,
);
