//! Image bucket and album table.

use crate::core::config::StorageConfig;
use crate::core::error::Result;
use crate::core::policy::{actions, Statement};
use crate::core::stack::Stack;
use crate::core::template::{kind, CfnResource, LogicalId, RemovalPolicy, Token};
use serde_json::{json, Value};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct BucketHandle {
    pub id: LogicalId,
    pub name: Token,
}

impl BucketHandle {
    pub fn arn(&self) -> Token {
        Token::get_att(&self.id, "Arn")
    }

    pub fn objects_arn(&self) -> Token {
        Token::concat([self.arn(), Token::literal("/*")])
    }

    pub fn read_statement(&self) -> Statement {
        Statement::allow(actions::S3_READ, [self.arn(), self.objects_arn()])
    }

    pub fn read_write_statement(&self) -> Statement {
        let acts: Vec<&str> = actions::S3_READ
            .iter()
            .chain(actions::S3_WRITE)
            .copied()
            .collect();
        Statement::allow(&acts, [self.arn(), self.objects_arn()])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableHandle {
    pub id: LogicalId,
    pub name: Token,
}

impl TableHandle {
    pub fn arn(&self) -> Token {
        Token::get_att(&self.id, "Arn")
    }

    pub fn indexes_arn(&self) -> Token {
        Token::concat([self.arn(), Token::literal("/index/*")])
    }

    pub fn read_statement(&self) -> Statement {
        Statement::allow(actions::DYNAMODB_READ, [self.arn(), self.indexes_arn()])
    }

    pub fn read_write_statement(&self) -> Statement {
        let acts: Vec<&str> = actions::DYNAMODB_READ
            .iter()
            .chain(actions::DYNAMODB_WRITE)
            .copied()
            .collect();
        Statement::allow(&acts, [self.arn(), self.indexes_arn()])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageHandle {
    pub bucket: BucketHandle,
    pub table: TableHandle,
}

/// `<prefix>-<account>-<region>`, folded to a literal when the stack
/// environment is pinned.
fn scoped_name(stack: &Stack, prefix: &str) -> Token {
    Token::join(
        "-",
        [
            Token::literal(prefix),
            stack.env().account_token(),
            stack.env().region_token(),
        ],
    )
}

fn attribute_definitions(config: &StorageConfig) -> Value {
    let mut defs: Vec<(&str, &str)> = Vec::new();
    for (name, ty) in [
        (config.partition_key.as_str(), "S"),
        (config.gsi_partition_key.as_str(), "S"),
        (config.gsi_sort_key.as_str(), "N"),
    ] {
        if !defs.iter().any(|(n, _)| *n == name) {
            defs.push((name, ty));
        }
    }
    Value::Array(
        defs.into_iter()
            .map(|(name, ty)| json!({ "AttributeName": name, "AttributeType": ty }))
            .collect(),
    )
}

pub fn declare(stack: &mut Stack, config: &StorageConfig) -> Result<StorageHandle> {
    let bucket_name = scoped_name(stack, &config.s3_bucket_prefix);
    let bucket = stack.add_resource(
        "StorageImageBucket",
        CfnResource::new(
            kind::BUCKET,
            json!({
                "BucketName": bucket_name,
                "BucketEncryption": {
                    "ServerSideEncryptionConfiguration": [{
                        "ServerSideEncryptionByDefault": { "SSEAlgorithm": "AES256" }
                    }]
                },
                "PublicAccessBlockConfiguration": {
                    "BlockPublicAcls": true,
                    "BlockPublicPolicy": true,
                    "IgnorePublicAcls": true,
                    "RestrictPublicBuckets": true,
                },
                "Tags": [{ "Key": "aws-cdk:auto-delete-objects", "Value": "true" }],
            }),
        )
        .with_removal(RemovalPolicy::Delete),
    )?;

    let table_name = scoped_name(stack, &config.dynamodb_table_prefix);
    let table = stack.add_resource(
        "StorageAlbumsTable",
        CfnResource::new(
            kind::TABLE,
            json!({
                "TableName": table_name,
                "AttributeDefinitions": attribute_definitions(config),
                "KeySchema": [{ "AttributeName": config.partition_key, "KeyType": "HASH" }],
                "BillingMode": "PAY_PER_REQUEST",
                "PointInTimeRecoverySpecification": { "PointInTimeRecoveryEnabled": true },
                "GlobalSecondaryIndexes": [{
                    "IndexName": config.gsi_name,
                    "KeySchema": [
                        { "AttributeName": config.gsi_partition_key, "KeyType": "HASH" },
                        { "AttributeName": config.gsi_sort_key, "KeyType": "RANGE" },
                    ],
                    "Projection": { "ProjectionType": "ALL" },
                }],
            }),
        )
        .with_removal(RemovalPolicy::Delete),
    )?;

    debug!("storage declared");
    Ok(StorageHandle {
        bucket: BucketHandle {
            id: bucket,
            name: bucket_name,
        },
        table: TableHandle {
            id: table,
            name: table_name,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stack::StackEnv;

    #[test]
    fn test_storage_names_include_account_and_region() {
        let mut s = Stack::new("T", StackEnv::default());
        let h = declare(&mut s, &StorageConfig::default()).unwrap();
        assert_eq!(
            h.bucket.name.as_value(),
            &json!({"Fn::Join": ["-", ["gara-images", {"Ref": "AWS::AccountId"}, {"Ref": "AWS::Region"}]]})
        );

        let mut pinned = Stack::new(
            "T",
            StackEnv::new(Some("111122223333".into()), Some("eu-west-1".into())),
        );
        let h = declare(&mut pinned, &StorageConfig::default()).unwrap();
        assert_eq!(h.table.name.as_literal(), Some("gara-albums-111122223333-eu-west-1"));
    }

    #[test]
    fn test_storage_table_schema() {
        let mut s = Stack::new("T", StackEnv::default());
        let h = declare(&mut s, &StorageConfig::default()).unwrap();
        let table = s.resource(&h.table.id).unwrap();
        assert_eq!(table.property("BillingMode"), Some(&json!("PAY_PER_REQUEST")));
        assert_eq!(table.deletion_policy, Some(RemovalPolicy::Delete));
        let defs = table.properties["AttributeDefinitions"].as_array().unwrap();
        assert_eq!(defs.len(), 3);
        let gsi = &table.properties["GlobalSecondaryIndexes"][0];
        assert_eq!(gsi["IndexName"], "PublishedIndex");
        assert_eq!(gsi["KeySchema"][1]["AttributeName"], "CreatedAt");
        assert_eq!(gsi["Projection"]["ProjectionType"], "ALL");
    }

    #[test]
    fn test_storage_shared_key_defined_once() {
        let config = StorageConfig {
            gsi_partition_key: "AlbumId".to_string(),
            ..StorageConfig::default()
        };
        let mut s = Stack::new("T", StackEnv::default());
        let h = declare(&mut s, &config).unwrap();
        let table = s.resource(&h.table.id).unwrap();
        assert_eq!(table.properties["AttributeDefinitions"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_storage_grants() {
        let mut s = Stack::new("T", StackEnv::default());
        let h = declare(&mut s, &StorageConfig::default()).unwrap();
        let read = h.bucket.read_statement();
        assert!(!read.actions.iter().any(|a| a.starts_with("s3:Put")));
        let rw = h.table.read_write_statement();
        assert!(rw.actions.contains(&"dynamodb:PutItem".to_string()));
        assert_eq!(rw.resources.len(), 2);
    }
}
